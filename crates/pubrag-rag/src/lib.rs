//! Retrieval-augmented answering over the document store and vector index.
//!
//! `RagPipeline` owns no persistent state. Writes (ingest, reconcile,
//! reindex) are serialised by one async mutex that covers the store save and
//! the index commit; reads take no lock.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use pubrag_core::config::RetrievalSettings;
use pubrag_core::error::{Error, Result};
use pubrag_core::traits::{Embedder, LlmProvider, VectorIndex};
use pubrag_core::types::{Answer, AnswerStatus, Document, DocumentId, GenerationOptions, NewDocument, RetrievedDocument};
use pubrag_store::DocumentStore;

pub mod prompt;

pub const NO_RELEVANT_DOCUMENTS_ANSWER: &str =
    "No relevant documents were found for this question. Ingest documents first or rephrase the query.";

const MAX_ID_LEN: usize = 128;

/// Outcome of [`RagPipeline::reconcile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Index entries dropped because their document is gone.
    pub removed: usize,
    /// Stored documents that had no index entry and were embedded.
    pub reindexed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub documents: usize,
    pub index_entries: usize,
    pub embedding_model: String,
    pub llm_model: String,
    pub llm_configured: bool,
}

pub struct RagPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<DocumentStore>,
    llm: Arc<dyn LlmProvider>,
    retrieval: RetrievalSettings,
    generation: GenerationOptions,
    write_guard: Mutex<()>,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<DocumentStore>,
        llm: Arc<dyn LlmProvider>,
        retrieval: RetrievalSettings,
        generation: GenerationOptions,
    ) -> Result<Self> {
        if embedder.dim() != index.dim() {
            return Err(Error::DimensionMismatch { expected: index.dim(), actual: embedder.dim() });
        }
        Ok(Self { embedder, index, store, llm, retrieval, generation, write_guard: Mutex::new(()) })
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Validate, embed, and persist a batch. Returns the ids in input order.
    pub async fn ingest(&self, documents: Vec<NewDocument>) -> Result<Vec<DocumentId>> {
        if documents.is_empty() {
            return Err(Error::Validation("no documents to ingest".into()));
        }
        let mut seen = HashSet::new();
        for (i, doc) in documents.iter().enumerate() {
            if doc.content.trim().is_empty() {
                return Err(Error::Validation(format!("document #{i} has empty content")));
            }
            if let Some(id) = &doc.id {
                validate_id(id)?;
                if !seen.insert(id.as_str()) {
                    return Err(Error::Validation(format!("duplicate document id '{id}' in batch")));
                }
            }
        }

        let now = Utc::now();
        let docs: Vec<Document> = documents
            .into_iter()
            .map(|d| {
                let id = d.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                d.into_document(id, now)
            })
            .collect();

        let start = Instant::now();
        let vectors = self.embed(docs.iter().map(|d| d.content.clone()).collect()).await?;
        let entries: Vec<(DocumentId, Vec<f32>)> = docs.iter().map(|d| d.id.clone()).zip(vectors).collect();
        let ids: Vec<DocumentId> = docs.iter().map(|d| d.id.clone()).collect();

        {
            let _guard = self.write_guard.lock().await;
            let previous = self.previous_versions(&ids)?;
            self.store.put_many(docs)?;
            if let Err(e) = self.commit_entries(&entries).await {
                self.roll_back_ingest(&ids, previous).await;
                return Err(e);
            }
        }
        info!(count = ids.len(), elapsed_ms = start.elapsed().as_millis(), "documents ingested");
        Ok(ids)
    }

    /// Top-k stored documents for `query`, best first.
    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> Result<Vec<RetrievedDocument>> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }
        let k = self.resolve_k(k)?;
        let vector = self.embed(vec![query.to_string()]).await?.pop().ok_or_else(|| Error::Embedding("no query vector".into()))?;
        let hits = self.index.search(&vector, k).await?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get(&hit.id) {
                Ok(doc) => out.push(RetrievedDocument::from_hit(doc, hit.score)),
                Err(Error::NotFound(_)) => debug!(id = %hit.id, "skipping stale index entry"),
                Err(e) => return Err(e),
            }
        }
        debug!(k, retrieved = out.len(), "retrieval done");
        Ok(out)
    }

    pub async fn answer(&self, query: &str, k: Option<usize>, elaborate: bool) -> Result<Answer> {
        let start = Instant::now();
        let retrieved = self.retrieve(query, k).await?;
        if retrieved.is_empty() {
            info!("no relevant documents; skipping LLM call");
            return Ok(Answer {
                query: query.to_string(),
                answer: NO_RELEVANT_DOCUMENTS_ANSWER.to_string(),
                status: AnswerStatus::NoRelevantDocuments,
                source_ids: Vec::new(),
                retrieved_documents: Vec::new(),
                processing_time: start.elapsed().as_secs_f64(),
            });
        }

        let prompt = prompt::build_prompt(query, &retrieved, elaborate);
        let text = self.llm.generate(&prompt, &self.generation).await?;
        let processing_time = start.elapsed().as_secs_f64();
        info!(sources = retrieved.len(), answer_chars = text.len(), processing_time, "query answered");
        Ok(Answer {
            query: query.to_string(),
            answer: text,
            status: AnswerStatus::Answered,
            source_ids: retrieved.iter().map(|d| d.id.clone()).collect(),
            retrieved_documents: retrieved,
            processing_time,
        })
    }

    /// Drop index entries without a document; embed documents without an entry.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _guard = self.write_guard.lock().await;
        let stored: HashSet<DocumentId> = self.store.ids()?.into_iter().collect();
        let indexed: HashSet<DocumentId> = self.index.ids().await?.into_iter().collect();

        let orphans: Vec<DocumentId> = indexed.difference(&stored).cloned().collect();
        let removed = if orphans.is_empty() { 0 } else { self.index.remove(&orphans).await? };

        let missing: Vec<Document> = self.store.list()?.into_iter().filter(|d| !indexed.contains(&d.id)).collect();
        let reindexed = self.index_documents(&missing).await?;

        if removed > 0 || reindexed > 0 {
            self.index.persist().await?;
            warn!(removed, reindexed, "index and store were out of sync; reconciled");
        } else {
            debug!("index and store consistent");
        }
        Ok(ReconcileReport { removed, reindexed })
    }

    /// Re-embed every stored document, then replace the index contents in
    /// one commit. An embedding failure leaves the index as it was.
    pub async fn reindex(&self) -> Result<usize> {
        let _guard = self.write_guard.lock().await;
        let start = Instant::now();
        let documents = self.store.list()?;
        let entries = if documents.is_empty() {
            Vec::new()
        } else {
            let vectors = self.embed(documents.iter().map(|d| d.content.clone()).collect()).await?;
            documents.iter().map(|d| d.id.clone()).zip(vectors).collect::<Vec<_>>()
        };

        let count = if entries.is_empty() { 0 } else { self.index.add_batch(&entries).await? };
        let stored: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        let orphans: Vec<DocumentId> =
            self.index.ids().await?.into_iter().filter(|id| !stored.contains(id.as_str())).collect();
        if !orphans.is_empty() {
            self.index.remove(&orphans).await?;
        }
        self.index.persist().await?;
        info!(count, elapsed_ms = start.elapsed().as_millis(), model = self.embedder.model_id(), "index rebuilt");
        Ok(count)
    }

    pub async fn stats(&self) -> Result<PipelineStats> {
        Ok(PipelineStats {
            documents: self.store.len()?,
            index_entries: self.index.len().await?,
            embedding_model: self.embedder.model_id().to_string(),
            llm_model: self.llm.model().to_string(),
            llm_configured: self.llm.is_configured(),
        })
    }

    async fn commit_entries(&self, entries: &[(DocumentId, Vec<f32>)]) -> Result<()> {
        self.index.add_batch(entries).await?;
        self.index.persist().await
    }

    /// Stored versions of `ids` before a write; `None` for ids not yet stored.
    fn previous_versions(&self, ids: &[DocumentId]) -> Result<Vec<(DocumentId, Option<Document>)>> {
        ids.iter()
            .map(|id| match self.store.get(id) {
                Ok(doc) => Ok((id.clone(), Some(doc))),
                Err(Error::NotFound(_)) => Ok((id.clone(), None)),
                Err(e) => Err(e),
            })
            .collect()
    }

    /// Undo a store write whose index commit failed. New ids are removed from
    /// both sides; replaced documents get their old text back and are
    /// re-embedded. Failures here are logged and left to `reconcile`.
    async fn roll_back_ingest(&self, ids: &[DocumentId], previous: Vec<(DocumentId, Option<Document>)>) {
        let (replaced, added): (Vec<_>, Vec<_>) = previous.into_iter().partition(|(_, doc)| doc.is_some());
        let added: Vec<DocumentId> = added.into_iter().map(|(id, _)| id).collect();
        let replaced: Vec<Document> = replaced.into_iter().filter_map(|(_, doc)| doc).collect();

        if let Err(e) = self.store.remove_many(&added) {
            warn!(error = %e, "rollback: failed to remove new documents from the store");
        }
        if !added.is_empty() {
            if let Err(e) = self.index.remove(&added).await {
                warn!(error = %e, "rollback: failed to remove new index entries");
            }
        }
        if !replaced.is_empty() {
            if let Err(e) = self.store.put_many(replaced.clone()) {
                warn!(error = %e, "rollback: failed to restore replaced documents");
            } else if let Err(e) = self.index_documents(&replaced).await {
                warn!(error = %e, "rollback: failed to re-embed replaced documents");
            }
        }
        warn!(count = ids.len(), "ingest rolled back after index commit failed");
    }

    async fn index_documents(&self, documents: &[Document]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let vectors = self.embed(documents.iter().map(|d| d.content.clone()).collect()).await?;
        let entries: Vec<(DocumentId, Vec<f32>)> = documents.iter().map(|d| d.id.clone()).zip(vectors).collect();
        self.index.add_batch(&entries).await
    }

    /// Run the CPU-bound embedder on the blocking pool.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embedder = Arc::clone(&self.embedder);
        let expected = texts.len();
        let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .map_err(|e| Error::Embedding(format!("embedding task failed: {e}")))??;
        if vectors.len() != expected {
            return Err(Error::Embedding(format!("expected {expected} vectors, got {}", vectors.len())));
        }
        Ok(vectors)
    }

    fn resolve_k(&self, k: Option<usize>) -> Result<usize> {
        let k = k.unwrap_or(self.retrieval.default_top_k);
        if k == 0 || k > self.retrieval.max_top_k {
            return Err(Error::Validation(format!("top_k must be within 1..={}", self.retrieval.max_top_k)));
        }
        Ok(k)
    }
}

/// Ids end up in file names and Lance predicates.
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(Error::Validation(format!("document id must be 1..={MAX_ID_LEN} characters")));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')) {
        return Err(Error::Validation(format!("document id '{id}' may only contain letters, digits, '-', '_', '.', ':'")));
    }
    Ok(())
}
