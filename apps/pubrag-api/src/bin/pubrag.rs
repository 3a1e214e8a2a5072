use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pubrag_api::seed::{self, SeedSet};
use pubrag_api::{router, AppState};
use pubrag_core::config::{Config, Settings};
use pubrag_core::types::AnswerStatus;

#[derive(Parser)]
#[command(name = "pubrag", version, about = "Retrieval-augmented answers over PubMed abstracts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile the index with the store, then serve the HTTP API.
    Serve {
        #[arg(long, env = "APP_SERVER__HOST")]
        host: Option<String>,
        #[arg(long, env = "APP_SERVER__PORT")]
        port: Option<u16>,
    },
    /// Ingest one of the bundled document sets.
    Seed {
        #[arg(long, value_enum, default_value = "pubmed")]
        set: SeedSet,
    },
    /// Rebuild the vector index from the document store.
    Reindex,
    /// Answer one question and print the result.
    Ask {
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        elaborate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Config::load().and_then(|c| c.settings()).context("loading configuration")?;

    match cli.command {
        Command::Serve { host, port } => serve(settings, host, port).await,
        Command::Seed { set } => {
            let state = AppState::from_settings(&settings).await?;
            let ids = state.pipeline.ingest(seed::documents(set)?).await?;
            info!(?set, count = ids.len(), "seed documents ingested");
            for id in ids {
                println!("{id}");
            }
            Ok(())
        }
        Command::Reindex => {
            let state = AppState::from_settings(&settings).await?;
            let count = state.pipeline.reindex().await?;
            println!("reindexed {count} documents");
            Ok(())
        }
        Command::Ask { question, top_k, elaborate } => {
            let state = AppState::from_settings(&settings).await?;
            state.pipeline.reconcile().await?;
            let answer = state.pipeline.answer(&question, top_k, elaborate).await?;
            println!("{}", answer.answer);
            if answer.status == AnswerStatus::Answered {
                println!();
                for doc in &answer.retrieved_documents {
                    println!("  [{:.4}] {} {}", doc.similarity_score, doc.id, doc.title);
                }
            }
            Ok(())
        }
    }
}

async fn serve(settings: Settings, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let state = AppState::from_settings(&settings).await?;
    let report = state.pipeline.reconcile().await?;
    info!(removed = report.removed, reindexed = report.reindexed, "startup reconciliation done");

    let host = host.unwrap_or(settings.server.host);
    let port = port.unwrap_or(settings.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!(%addr, "PubMed RAG API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
