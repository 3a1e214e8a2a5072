//! Request and response bodies.

use serde::{Deserialize, Serialize};

use pubrag_core::types::{Document, Meta, NewDocument};

/// Element of the `/api/ingest` array.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestDocument {
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl From<IngestDocument> for NewDocument {
    fn from(d: IngestDocument) -> Self {
        NewDocument { id: None, title: d.title, content: d.content, metadata: d.metadata }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchIngestRequest {
    pub documents: Vec<NewDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub document_ids: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub elaborate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub documents: usize,
    pub index_entries: usize,
    pub embedding_model: String,
    pub llm_model: String,
    pub llm_configured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
}

impl From<&Document> for DocumentSummary {
    fn from(d: &Document) -> Self {
        Self { id: d.id.clone(), title: d.title.clone() }
    }
}
