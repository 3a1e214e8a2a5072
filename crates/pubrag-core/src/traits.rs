use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{DocumentId, GenerationOptions, Prompt, SearchHit};

/// Text → fixed-length vector. Implementations are CPU bound; async callers
/// should run them on a blocking thread.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model, e.g. `bert:all-MiniLM-L6-v2:d384`.
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    /// Order-preserving; returns exactly one vector per input.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| Error::Embedding("embedder returned no vector".to_string()))
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dim(&self) -> usize;

    /// Insert or replace the entries keyed by id. Returns the number written.
    async fn add_batch(&self, entries: &[(DocumentId, Vec<f32>)]) -> Result<usize>;

    /// Up to `k` nearest entries, best first. Empty index → empty list.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    async fn remove(&self, ids: &[DocumentId]) -> Result<usize>;
    async fn ids(&self) -> Result<Vec<DocumentId>>;
    async fn len(&self) -> Result<usize>;
    async fn clear(&self) -> Result<()>;

    /// Record a consistency checkpoint for the current contents.
    async fn persist(&self) -> Result<()>;

    async fn add(&self, id: &str, vector: &[f32]) -> Result<()> {
        self.add_batch(&[(id.to_string(), vector.to_vec())]).await.map(|_| ())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Default model name used when the options carry none.
    fn model(&self) -> &str;
    fn is_configured(&self) -> bool;
    async fn generate(&self, prompt: &Prompt, options: &GenerationOptions) -> Result<String>;
}
