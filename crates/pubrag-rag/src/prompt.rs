//! Prompt construction for grounded answers.

use std::fmt::Write;

use pubrag_core::types::{Prompt, RetrievedDocument};

const SYSTEM_CONCISE: &str = "You are a medical research assistant with expertise in genetics and medicine.\n\
Your task is to answer questions concisely based on the scientific documents provided as context.\n\
Be accurate and focus on the key information relevant to the query.\n\
Always cite the specific documents you're drawing information from in your answer.\n\
If the context doesn't contain enough information to answer the query, clearly state this limitation.";

const SYSTEM_ELABORATE: &str = "You are a medical research assistant with expertise in genetics and medicine.\n\
Your task is to provide comprehensive, detailed answers based on the scientific documents provided as context.\n\
Include relevant medical terminology and explain concepts thoroughly.\n\
Always cite the specific documents you're drawing information from in your answer.\n\
If the context doesn't contain enough information to answer fully, clearly state this limitation.";

pub fn system_prompt(elaborate: bool) -> &'static str {
    if elaborate { SYSTEM_ELABORATE } else { SYSTEM_CONCISE }
}

/// Numbered context block, one entry per retrieved document.
pub fn format_context(documents: &[RetrievedDocument]) -> String {
    let mut out = String::new();
    for (i, doc) in documents.iter().enumerate() {
        let title = if doc.title.trim().is_empty() { "Untitled" } else { doc.title.as_str() };
        let _ = writeln!(out, "Document {}:", i + 1);
        let _ = writeln!(out, "Title: {title}");
        let _ = writeln!(out, "Content: {}", doc.content);
        let _ = writeln!(out, "Relevance Score: {:.4}", doc.similarity_score);
        out.push('\n');
    }
    out
}

pub fn build_prompt(query: &str, documents: &[RetrievedDocument], elaborate: bool) -> Prompt {
    let user = format!(
        "Question: {query}\n\nContext information from relevant documents:\n{}\nPlease answer the question based on the context information provided above.",
        format_context(documents)
    );
    Prompt { system: system_prompt(elaborate).to_string(), user }
}
