use pubrag_core::config::EmbeddingSettings;
use pubrag_core::traits::Embedder;
use pubrag_embed::get_default_embedder;

#[test]
fn fake_embedder_shapes_and_determinism() {
    let settings = EmbeddingSettings { use_fake: true, dimension: 384, ..EmbeddingSettings::default() };
    let embedder = get_default_embedder(&settings).expect("embedder");
    let texts = vec!["Ret gene mutations".to_string(), "Ret gene mutations".to_string(), "aganglionic colon".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    assert_eq!(embs.len(), 3, "one vector per input, in order");

    let v1 = &embs[0];
    assert_eq!(v1.len(), 384, "embedding dim follows settings");
    assert_eq!(embedder.dim(), 384);

    // Norm approximately 1.0
    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    // Deterministic for same input
    for (a, b) in v1.iter().zip(embs[1].iter()) { assert!((a - b).abs() <= 1e-6); }
    assert_ne!(embs[0], embs[2]);
}

#[test]
fn empty_text_is_rejected() {
    let settings = EmbeddingSettings { use_fake: true, ..EmbeddingSettings::default() };
    let embedder = get_default_embedder(&settings).expect("embedder");
    let err = embedder.embed("").expect_err("empty text must fail");
    assert!(err.is_client_error(), "got {err}");
}

#[test]
fn model_id_carries_dimension() {
    let settings = EmbeddingSettings { use_fake: true, dimension: 8, ..EmbeddingSettings::default() };
    let embedder = get_default_embedder(&settings).expect("embedder");
    assert!(embedder.model_id().ends_with(":d8"), "{}", embedder.model_id());
}
