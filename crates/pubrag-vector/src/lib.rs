//! LanceDB-backed vector index keyed by document id.

pub mod index;
pub mod schema;
pub mod table;

pub use index::{LanceVectorIndex, SEARCH_OVERFETCH};
