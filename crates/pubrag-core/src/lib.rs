//! Shared domain types, error enum, component traits, and configuration for
//! the PubMed RAG workspace.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, LlmErrorKind, Result};
