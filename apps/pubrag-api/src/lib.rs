//! HTTP API and command-line front end for the PubMed RAG service.

pub mod error;
pub mod extract;
pub mod models;
pub mod routes;
pub mod seed;
pub mod state;

pub use routes::router;
pub use state::AppState;
