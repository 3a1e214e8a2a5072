//! Bundled document sets for `pubrag seed`.

use clap::ValueEnum;

use pubrag_core::error::{Error, Result};
use pubrag_core::types::NewDocument;

const INITIAL: &str = include_str!("../data/initial.json");
const PUBMED: &str = include_str!("../data/pubmed.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SeedSet {
    /// Three Hirschsprung disease abstracts; ids are generated.
    Initial,
    /// The same three PubMed articles keyed by PMID.
    Pubmed,
}

pub fn documents(set: SeedSet) -> Result<Vec<NewDocument>> {
    let raw = match set {
        SeedSet::Initial => INITIAL,
        SeedSet::Pubmed => PUBMED,
    };
    serde_json::from_str(raw).map_err(|e| Error::InvalidConfig(format!("bundled {set:?} documents are malformed: {e}")))
}
