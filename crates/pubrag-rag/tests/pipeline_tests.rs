use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use pubrag_core::config::RetrievalSettings;
use pubrag_core::error::{Error, Result};
use pubrag_core::traits::{Embedder, LlmProvider, VectorIndex};
use pubrag_core::types::{AnswerStatus, DocumentId, GenerationOptions, NewDocument, Prompt, SearchHit};
use pubrag_embed::FakeEmbedder;
use pubrag_rag::{RagPipeline, ReconcileReport, NO_RELEVANT_DOCUMENTS_ANSWER};
use pubrag_store::DocumentStore;
use pubrag_vector::LanceVectorIndex;

const DIM: usize = 384;

/// Returns a fixed answer and records every prompt it was given.
#[derive(Default)]
struct ScriptedLlm {
    prompts: Mutex<Vec<Prompt>>,
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn generate(&self, prompt: &Prompt, _options: &GenerationOptions) -> Result<String> {
        self.prompts.lock().expect("prompts").push(prompt.clone());
        Ok("RET mutations.".to_string())
    }
}

struct Harness {
    _tmp: TempDir,
    pipeline: Arc<RagPipeline>,
    index: Arc<LanceVectorIndex>,
    store: Arc<DocumentStore>,
    llm: Arc<ScriptedLlm>,
    embedder: Arc<FakeEmbedder>,
}

/// Delegates to a real index; writes fail while `fail_writes` is set.
struct FlakyIndex {
    inner: Arc<LanceVectorIndex>,
    fail_writes: AtomicBool,
}

impl FlakyIndex {
    fn write_check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::Index("simulated write failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    async fn add_batch(&self, entries: &[(DocumentId, Vec<f32>)]) -> Result<usize> {
        self.write_check()?;
        self.inner.add_batch(entries).await
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.inner.search(query, k).await
    }

    async fn remove(&self, ids: &[DocumentId]) -> Result<usize> {
        self.inner.remove(ids).await
    }

    async fn ids(&self) -> Result<Vec<DocumentId>> {
        self.inner.ids().await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    async fn clear(&self) -> Result<()> {
        self.write_check()?;
        self.inner.clear().await
    }

    async fn persist(&self) -> Result<()> {
        self.inner.persist().await
    }
}

async fn harness() -> Harness {
    harness_with(FakeEmbedder::new(DIM), |index| index as Arc<dyn VectorIndex>).await
}

async fn harness_with(
    embedder: FakeEmbedder,
    wrap: impl FnOnce(Arc<LanceVectorIndex>) -> Arc<dyn VectorIndex>,
) -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let embedder = Arc::new(embedder);
    let index = Arc::new(
        LanceVectorIndex::open(&tmp.path().join("vectors.lance"), "documents", DIM, embedder.model_id()).await.expect("index"),
    );
    let store = Arc::new(DocumentStore::open(tmp.path().join("documents.json"), None).expect("store"));
    let llm = Arc::new(ScriptedLlm::default());
    let pipeline = RagPipeline::new(
        embedder.clone(),
        wrap(index.clone()),
        store.clone(),
        llm.clone(),
        RetrievalSettings::default(),
        GenerationOptions::default(),
    )
    .expect("pipeline");
    Harness { _tmp: tmp, pipeline: Arc::new(pipeline), index, store, llm, embedder }
}

#[tokio::test]
async fn hirschsprung_question_cites_the_relevant_abstract() {
    let h = harness().await;
    let ids = h
        .pipeline
        .ingest(vec![
            NewDocument::new("RET and HSCR", "Ret gene mutations cause Hirschsprung disease").with_id("d1"),
            NewDocument::new("Sales", "The quarterly sales report shows stable revenue").with_id("d2"),
        ])
        .await
        .expect("ingest");
    assert_eq!(ids, vec!["d1", "d2"]);

    let answer = h.pipeline.answer("What causes Hirschsprung disease?", Some(1), false).await.expect("answer");
    assert_eq!(answer.status, AnswerStatus::Answered);
    assert_eq!(answer.answer, "RET mutations.");
    assert_eq!(answer.source_ids, vec!["d1"]);
    assert!(!answer.source_ids.contains(&"d2".to_string()));

    let prompts = h.llm.prompts.lock().expect("prompts");
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].user.contains("Ret gene mutations cause Hirschsprung disease"));
    assert!(!prompts[0].user.contains("quarterly sales"));
}

#[tokio::test]
async fn own_text_is_retrieved_in_top_k() {
    let h = harness().await;
    let texts = [
        "Metformin reduces hepatic gluconeogenesis in type 2 diabetes",
        "Statins lower LDL cholesterol and cardiovascular risk",
        "BRCA1 variants increase hereditary breast cancer risk",
        "Vitamin D deficiency is associated with rickets in children",
    ];
    let ids = h.pipeline.ingest(texts.iter().map(|t| NewDocument::new("", *t)).collect()).await.expect("ingest");
    for (id, text) in ids.iter().zip(texts) {
        let hits = h.pipeline.retrieve(text, Some(3)).await.expect("retrieve");
        assert!(hits.iter().any(|d| &d.id == id), "{text} not in its own top-3");
        assert_eq!(&hits[0].id, id);
    }
}

#[tokio::test]
async fn generated_ids_are_uuids() {
    let h = harness().await;
    let ids = h.pipeline.ingest(vec![NewDocument::new("t", "some abstract text")]).await.expect("ingest");
    assert_eq!(ids.len(), 1);
    assert!(uuid::Uuid::parse_str(&ids[0]).is_ok());
    assert!(h.store.contains(&ids[0]).expect("contains"));
}

#[tokio::test]
async fn invalid_batches_are_rejected_before_any_write() {
    let h = harness().await;
    assert!(matches!(h.pipeline.ingest(Vec::new()).await, Err(Error::Validation(_))));
    assert!(matches!(h.pipeline.ingest(vec![NewDocument::new("t", "   ")]).await, Err(Error::Validation(_))));
    let dup = vec![NewDocument::new("a", "one").with_id("x"), NewDocument::new("b", "two").with_id("x")];
    assert!(matches!(h.pipeline.ingest(dup).await, Err(Error::Validation(_))));
    let bad_id = vec![NewDocument::new("a", "one").with_id("has space")];
    assert!(matches!(h.pipeline.ingest(bad_id).await, Err(Error::Validation(_))));

    assert!(h.store.is_empty().expect("store"));
    assert!(h.index.is_empty().await.expect("index"));
}

#[tokio::test]
async fn top_k_outside_range_is_a_validation_error() {
    let h = harness().await;
    assert!(matches!(h.pipeline.retrieve("anything", Some(0)).await, Err(Error::Validation(_))));
    assert!(matches!(h.pipeline.retrieve("anything", Some(21)).await, Err(Error::Validation(_))));
    assert!(matches!(h.pipeline.retrieve("  ", None).await, Err(Error::Validation(_))));
}

#[tokio::test]
async fn empty_index_answers_without_calling_the_llm() {
    let h = harness().await;
    let answer = h.pipeline.answer("What causes Hirschsprung disease?", None, false).await.expect("answer");
    assert_eq!(answer.status, AnswerStatus::NoRelevantDocuments);
    assert_eq!(answer.answer, NO_RELEVANT_DOCUMENTS_ANSWER);
    assert!(answer.source_ids.is_empty());
    assert!(h.llm.prompts.lock().expect("prompts").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingest_keeps_store_and_index_in_step() {
    let h = harness().await;
    let n = 8;
    let tasks = (0..n).map(|i| {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move {
            pipeline.ingest(vec![NewDocument::new(format!("doc {i}"), format!("abstract number {i} about gene {i}")).with_id(format!("doc-{i}"))]).await
        })
    });
    for result in futures::future::join_all(tasks).await {
        result.expect("join").expect("ingest");
    }
    assert_eq!(h.store.len().expect("store"), n);
    assert_eq!(h.index.len().await.expect("index"), n);
}

#[tokio::test]
async fn reingesting_an_id_replaces_document_and_vector() {
    let h = harness().await;
    h.pipeline.ingest(vec![NewDocument::new("v1", "Insulin resistance in obesity").with_id("p1")]).await.expect("ingest");
    h.pipeline.ingest(vec![NewDocument::new("v2", "Ret gene mutations cause Hirschsprung disease").with_id("p1")]).await.expect("re-ingest");

    assert_eq!(h.store.len().expect("store"), 1);
    assert_eq!(h.index.len().await.expect("index"), 1);
    let hits = h.pipeline.retrieve("Hirschsprung disease", Some(1)).await.expect("retrieve");
    assert_eq!(hits[0].title, "v2");
}

#[tokio::test]
async fn stale_entries_are_skipped_then_reconciled() {
    let h = harness().await;
    h.pipeline.ingest(vec![NewDocument::new("real", "Ret gene mutations cause Hirschsprung disease").with_id("real")]).await.expect("ingest");

    // an index entry with no document, matching the query exactly
    let query = "What causes Hirschsprung disease?";
    let ghost = h.embedder.embed(query).expect("embed");
    h.index.add("ghost", &ghost).await.expect("add");
    // a document with no index entry
    h.store.put(NewDocument::new("unindexed", "Statins lower LDL cholesterol").into_document("late".into(), Utc::now())).expect("put");

    let hits = h.pipeline.retrieve(query, Some(2)).await.expect("retrieve");
    assert_eq!(hits.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), vec!["real"]);

    let report = h.pipeline.reconcile().await.expect("reconcile");
    assert_eq!(report, ReconcileReport { removed: 1, reindexed: 1 });
    let mut ids = h.index.ids().await.expect("ids");
    ids.sort();
    assert_eq!(ids, vec!["late", "real"]);

    assert_eq!(h.pipeline.reconcile().await.expect("again"), ReconcileReport::default());
}

#[tokio::test]
async fn reindex_rebuilds_from_the_store() {
    let h = harness().await;
    h.pipeline
        .ingest(vec![NewDocument::new("a", "first abstract").with_id("a"), NewDocument::new("b", "second abstract").with_id("b")])
        .await
        .expect("ingest");
    h.index.clear().await.expect("clear");
    let ghost = h.embedder.embed("ghost abstract").expect("embed");
    h.index.add("ghost", &ghost).await.expect("add");
    assert_eq!(h.pipeline.reindex().await.expect("reindex"), 2);
    assert_eq!(h.index.ids().await.expect("ids"), vec!["a", "b"]);

    let stats = h.pipeline.stats().await.expect("stats");
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.index_entries, 2);
    assert_eq!(stats.embedding_model, "fake:xxhash:d384");
    assert_eq!(stats.llm_model, "scripted");
}

#[test]
fn mismatched_embedder_and_index_are_refused() {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let tmp = TempDir::new().expect("tempdir");
        let index = Arc::new(LanceVectorIndex::open(&tmp.path().join("v.lance"), "documents", 16, "x").await.expect("index"));
        let store = Arc::new(DocumentStore::open(tmp.path().join("d.json"), None).expect("store"));
        let result = RagPipeline::new(
            Arc::new(FakeEmbedder::new(DIM)),
            index,
            store,
            Arc::new(ScriptedLlm::default()),
            RetrievalSettings::default(),
            GenerationOptions::default(),
        );
        assert!(matches!(result, Err(Error::DimensionMismatch { expected: 16, actual: DIM })));
    });
}

#[tokio::test]
async fn failed_reindex_keeps_the_existing_index() {
    let h = harness_with(FakeEmbedder::new(DIM).with_max_input_chars(50), |index| index as Arc<dyn VectorIndex>).await;
    h.pipeline.ingest(vec![NewDocument::new("a", "Ret gene mutations cause Hirschsprung disease").with_id("a")]).await.expect("ingest");
    // stored directly, so it bypasses ingest and is over the embedder's limit
    h.store.put(NewDocument::new("b", "x".repeat(80)).into_document("b".into(), Utc::now())).expect("put");

    assert!(matches!(h.pipeline.reindex().await, Err(Error::Validation(_))));
    assert_eq!(h.index.ids().await.expect("ids"), vec!["a"]);
    let hits = h.pipeline.retrieve("Hirschsprung disease", Some(1)).await.expect("retrieve");
    assert_eq!(hits[0].id, "a");
}

#[tokio::test]
async fn failed_index_write_rolls_back_the_store() {
    let mut flaky = None;
    let h = harness_with(FakeEmbedder::new(DIM), |index| {
        let wrapped = Arc::new(FlakyIndex { inner: index, fail_writes: AtomicBool::new(false) });
        flaky = Some(Arc::clone(&wrapped));
        wrapped as Arc<dyn VectorIndex>
    })
    .await;
    let flaky = flaky.expect("flaky index");
    h.pipeline.ingest(vec![NewDocument::new("v1", "Insulin resistance in obesity").with_id("p1")]).await.expect("ingest");

    flaky.fail_writes.store(true, Ordering::SeqCst);
    let batch = vec![
        NewDocument::new("v2", "Ret gene mutations cause Hirschsprung disease").with_id("p1"),
        NewDocument::new("new", "Statins lower LDL cholesterol").with_id("p2"),
    ];
    assert!(matches!(h.pipeline.ingest(batch).await, Err(Error::Index(_))));

    assert_eq!(h.store.ids().expect("ids"), vec!["p1"]);
    assert_eq!(h.store.get("p1").expect("p1").title, "v1");
    assert!(matches!(h.store.get("p2"), Err(Error::NotFound(_))));
    assert_eq!(h.index.ids().await.expect("ids"), vec!["p1"]);
}
