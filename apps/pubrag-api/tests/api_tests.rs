use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use pubrag_api::{router, AppState};
use pubrag_core::config::RetrievalSettings;
use pubrag_core::error::{Error, LlmErrorKind, Result};
use pubrag_core::traits::{Embedder, LlmProvider};
use pubrag_core::types::{GenerationOptions, Prompt};
use pubrag_embed::FakeEmbedder;
use pubrag_rag::RagPipeline;
use pubrag_store::DocumentStore;
use pubrag_vector::LanceVectorIndex;

struct ScriptedLlm {
    configured: bool,
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn generate(&self, _prompt: &Prompt, _options: &GenerationOptions) -> Result<String> {
        if self.configured {
            Ok("RET gene mutations are the major cause.".to_string())
        } else {
            Err(Error::llm(LlmErrorKind::NotConfigured, "no API key"))
        }
    }
}

async fn app_with(configured: bool) -> (TempDir, Router) {
    let tmp = TempDir::new().expect("tempdir");
    let embedder = Arc::new(FakeEmbedder::new(384));
    let index = LanceVectorIndex::open(&tmp.path().join("vectors.lance"), "documents", 384, embedder.model_id()).await.expect("index");
    let store = DocumentStore::open(tmp.path().join("documents.json"), None).expect("store");
    let pipeline = RagPipeline::new(
        embedder,
        Arc::new(index),
        Arc::new(store),
        Arc::new(ScriptedLlm { configured }),
        RetrievalSettings::default(),
        GenerationOptions::default(),
    )
    .expect("pipeline");
    (tmp, router(AppState::new(Arc::new(pipeline))))
}

async fn app() -> (TempDir, Router) {
    app_with(true).await
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if body.is_some() {
        req = req.header(header::CONTENT_TYPE, "application/json");
    }
    let req = req.body(body.map_or_else(Body::empty, |b| Body::from(b.to_string()))).expect("request");
    let resp = app.clone().oneshot(req).await.expect("response");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json body") };
    (status, value)
}

#[tokio::test]
async fn root_and_health() {
    let (_tmp, app) = app().await;
    let (status, body) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["endpoints"]["query"], "/api/query");

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["documents"], 0);
    assert_eq!(body["embedding_model"], "fake:xxhash:d384");
    assert_eq!(body["llm_configured"], true);
}

#[tokio::test]
async fn ingest_then_query_returns_grounded_answer() {
    let (_tmp, app) = app().await;
    let docs = json!([
        { "title": "RET and HSCR", "content": "Ret gene mutations cause Hirschsprung disease", "metadata": { "pmid": "15858239" } },
        { "title": "Sales", "content": "The quarterly sales report shows stable revenue" }
    ]);
    let (status, body) = send(&app, "POST", "/api/ingest", Some(&docs.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    let ids = body["document_ids"].as_array().expect("ids").clone();
    assert_eq!(ids.len(), 2);

    let q = json!({ "query": "What causes Hirschsprung disease?", "top_k": 1 });
    let (status, body) = send(&app, "POST", "/api/query", Some(&q.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "answered");
    assert_eq!(body["answer"], "RET gene mutations are the major cause.");
    assert_eq!(body["source_ids"], json!([ids[0]]));
    assert_eq!(body["retrieved_documents"][0]["metadata"]["pmid"], "15858239");
    assert!(body["processing_time"].as_f64().is_some());
}

#[tokio::test]
async fn batch_ingest_keeps_client_ids_and_documents_are_listed() {
    let (_tmp, app) = app().await;
    let req = json!({ "documents": [
        { "id": "6650562", "title": "Prenatal diagnosis", "content": "Hirschsprung disease prenatal ultrasound" },
        { "id": "20598273", "title": "Rare and common variants", "content": "RET coding and noncoding variants" }
    ]});
    let (status, body) = send(&app, "POST", "/api/batch-ingest", Some(&req.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["document_ids"], json!(["6650562", "20598273"]));

    let (status, body) = send(&app, "GET", "/api/documents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([
        { "id": "6650562", "title": "Prenatal diagnosis" },
        { "id": "20598273", "title": "Rare and common variants" }
    ]));

    let (status, body) = send(&app, "GET", "/api/documents/20598273", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "RET coding and noncoding variants");
}

#[tokio::test]
async fn unknown_document_is_404() {
    let (_tmp, app) = app().await;
    let (status, body) = send(&app, "GET", "/api/documents/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn malformed_bodies_are_json_400s() {
    let (_tmp, app) = app().await;
    for (uri, body) in [
        ("/api/ingest", "{ not json"),
        ("/api/ingest", r#"{"title": "object instead of array"}"#),
        ("/api/batch-ingest", r#"{"documents": [{"title": "no content"}]}"#),
        ("/api/query", r#"{"top_k": 3}"#),
    ] {
        let (status, value) = send(&app, "POST", uri, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} {body}");
        assert_eq!(value["error"]["code"], "INVALID_REQUEST");
    }
}

#[tokio::test]
async fn validation_failures_are_400() {
    let (_tmp, app) = app().await;
    let (status, body) = send(&app, "POST", "/api/ingest", Some("[]")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = send(&app, "POST", "/api/ingest", Some(r#"[{"title": "t", "content": "  "}]"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/api/query", Some(r#"{"query": ""}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/api/query", Some(r#"{"query": "x", "top_k": 0}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_index_query_reports_no_relevant_documents() {
    let (_tmp, app) = app().await;
    let (status, body) = send(&app, "POST", "/api/query", Some(r#"{"query": "What causes Hirschsprung disease?"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_relevant_documents");
    assert_eq!(body["source_ids"], json!([]));
}

#[tokio::test]
async fn unconfigured_llm_is_503() {
    let (_tmp, app) = app_with(false).await;
    send(&app, "POST", "/api/ingest", Some(r#"[{"title": "t", "content": "Ret gene mutations"}]"#)).await;
    let (status, body) = send(&app, "POST", "/api/query", Some(r#"{"query": "Ret gene"}"#)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "LLM_NOT_CONFIGURED");
}
