//! Domain types shared by the store, the index, and the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type DocumentId = String;
pub type Meta = BTreeMap<String, serde_json::Value>;

/// A stored source document (one PubMed abstract).
///
/// - `id`: unique identifier, client supplied (e.g. a PMID) or generated
/// - `title`: display title, may be empty
/// - `content`: the text that is embedded and handed to the LLM
/// - `metadata`: free-form source information (`pmid`, `source_url`, ...)
/// - `created_at`: ingestion time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Meta,
    pub created_at: DateTime<Utc>,
}

/// Ingestion input; `id` is assigned when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl NewDocument {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: None, title: title.into(), content: content.into(), metadata: Meta::new() }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<DocumentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn into_document(self, id: DocumentId, created_at: DateTime<Utc>) -> Document {
        Document { id, title: self.title, content: self.content, metadata: self.metadata, created_at }
    }
}

/// One result of a vector search. Higher `score` is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: DocumentId,
    pub score: f32,
}

/// A search hit resolved against the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    pub similarity_score: f32,
    #[serde(default)]
    pub metadata: Meta,
}

impl RetrievedDocument {
    pub fn from_hit(doc: Document, score: f32) -> Self {
        Self { id: doc.id, title: doc.title, content: doc.content, similarity_score: score, metadata: doc.metadata }
    }
}

/// System and user messages sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Pass-through sampling options for the chat-completion API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { model: None, temperature: 0.5, max_tokens: 1000, top_p: 1.0, frequency_penalty: 0.0, presence_penalty: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    NoRelevantDocuments,
}

/// Result of a question: the generated text plus the context it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub query: String,
    pub answer: String,
    pub status: AnswerStatus,
    pub source_ids: Vec<DocumentId>,
    pub retrieved_documents: Vec<RetrievedDocument>,
    /// Seconds spent retrieving and generating.
    pub processing_time: f64,
}
