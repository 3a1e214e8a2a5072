//! Component wiring shared by the server and the CLI commands.

use std::sync::Arc;
use tracing::{info, warn};

use pubrag_core::config::Settings;
use pubrag_core::error::Result;
use pubrag_core::traits::LlmProvider;
use pubrag_embed::get_default_embedder;
use pubrag_llm::OpenAiChatClient;
use pubrag_rag::RagPipeline;
use pubrag_store::DocumentStore;
use pubrag_vector::LanceVectorIndex;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        Self { pipeline }
    }

    /// Load the embedder, open the index and store, and build the LLM client.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        info!(model = %settings.embedding.model_name, dir = %settings.embedding.model_dir.display(), "embedding model");
        let embedder = get_default_embedder(&settings.embedding)?;

        info!(path = %settings.index.path.display(), table = %settings.index.table, "vector index");
        let index = LanceVectorIndex::open(&settings.index.path, &settings.index.table, embedder.dim(), embedder.model_id()).await?;

        info!(path = %settings.store.path.display(), "document store");
        let store = DocumentStore::open(&settings.store.path, settings.store.raw_documents_dir.clone())?;

        let llm = OpenAiChatClient::new(&settings.llm)?;
        info!(model = %llm.model(), base_url = %settings.llm.base_url, "LLM provider");
        if !llm.is_configured() {
            warn!("OPENAI_API_KEY not set; /api/query will return 503 until a key is configured");
        }

        let pipeline = RagPipeline::new(
            embedder,
            Arc::new(index),
            Arc::new(store),
            Arc::new(llm),
            settings.retrieval.clone(),
            settings.llm.generation_options(),
        )?;
        Ok(Self::new(Arc::new(pipeline)))
    }
}
