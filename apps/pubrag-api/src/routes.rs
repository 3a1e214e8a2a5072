//! HTTP surface.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Banner and endpoint list. |
//! | `GET`  | `/health` | Document/index counts and model ids. |
//! | `POST` | `/api/ingest` | Ingest an array of documents. |
//! | `POST` | `/api/batch-ingest` | Ingest `{documents: [...]}`, ids optional. |
//! | `POST` | `/api/query` | Retrieve and answer. |
//! | `GET`  | `/api/documents` | `{id, title}` for every stored document. |
//! | `GET`  | `/api/documents/{id}` | One stored document. |

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

use pubrag_core::types::{Answer, Document, NewDocument};

use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::models::{BatchIngestRequest, DocumentSummary, HealthResponse, IngestDocument, IngestResponse, QueryRequest};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/ingest", post(ingest))
        .route("/batch-ingest", post(batch_ingest))
        .route("/query", post(query))
        .route("/documents", get(list_documents))
        .route("/documents/{id}", get(get_document));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api", api)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO).latency_unit(LatencyUnit::Millis)),
        )
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "PubMed RAG API is running",
        "endpoints": {
            "health": "/health",
            "ingest": "/api/ingest",
            "batch_ingest": "/api/batch-ingest",
            "query": "/api/query",
            "documents": "/api/documents"
        }
    }))
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let stats = state.pipeline.stats().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        documents: stats.documents,
        index_entries: stats.index_entries,
        embedding_model: stats.embedding_model,
        llm_model: stats.llm_model,
        llm_configured: stats.llm_configured,
    }))
}

async fn ingest(State(state): State<AppState>, ApiJson(docs): ApiJson<Vec<IngestDocument>>) -> ApiResult<Json<IngestResponse>> {
    ingest_new(&state, docs.into_iter().map(NewDocument::from).collect()).await
}

async fn batch_ingest(State(state): State<AppState>, ApiJson(req): ApiJson<BatchIngestRequest>) -> ApiResult<Json<IngestResponse>> {
    ingest_new(&state, req.documents).await
}

async fn ingest_new(state: &AppState, docs: Vec<NewDocument>) -> ApiResult<Json<IngestResponse>> {
    let start = Instant::now();
    let ids = state.pipeline.ingest(docs).await?;
    Ok(Json(IngestResponse {
        status: "success".to_string(),
        message: format!("Successfully ingested {} documents in {:.2} seconds", ids.len(), start.elapsed().as_secs_f64()),
        document_ids: ids,
    }))
}

async fn query(State(state): State<AppState>, ApiJson(req): ApiJson<QueryRequest>) -> ApiResult<Json<Answer>> {
    let answer = state.pipeline.answer(&req.query, req.top_k, req.elaborate).await?;
    Ok(Json(answer))
}

async fn list_documents(State(state): State<AppState>) -> ApiResult<Json<Vec<DocumentSummary>>> {
    let docs = state.pipeline.store().list()?;
    Ok(Json(docs.iter().map(DocumentSummary::from).collect()))
}

async fn get_document(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Document>> {
    Ok(Json(state.pipeline.store().get(&id)?))
}
