//! Sentence embeddings for the RAG pipeline.
//!
//! `BertEmbedder` runs a BERT sentence encoder (all-MiniLM-L6-v2 by default)
//! through candle with masked mean pooling. `FakeEmbedder` is a deterministic
//! token-hashing stand-in used by tests and by `APP_USE_FAKE_EMBEDDINGS=1`.

use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

use pubrag_core::config::EmbeddingSettings;
use pubrag_core::error::{Error, Result};
use pubrag_core::traits::Embedder;

pub mod device;
pub mod pool;
pub mod tokenize;

pub use pool::masked_mean_l2;

/// Texts per forward pass.
const EMBED_BATCH_SIZE: usize = 32;
pub const DEFAULT_MAX_INPUT_CHARS: usize = 20_000;

/// Reject inputs the model must not see: blank text or text over `max_chars`.
pub fn validate_inputs(texts: &[String], max_chars: usize) -> Result<()> {
    for (i, text) in texts.iter().enumerate() {
        if text.trim().is_empty() {
            return Err(Error::Validation(format!("text #{i} is empty")));
        }
        let len = text.chars().count();
        if len > max_chars {
            return Err(Error::Validation(format!("text #{i} has {len} characters; the limit is {max_chars}")));
        }
    }
    Ok(())
}

pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    dim: usize,
    max_len: usize,
    max_input_chars: usize,
}

impl BertEmbedder {
    /// Load `config.json`, `tokenizer.json`, and weights from `settings.model_dir`.
    pub fn load(settings: &EmbeddingSettings) -> Result<Self> {
        Self::load_inner(settings).map_err(|e| Error::Embedding(format!("{e:#}")))
    }

    fn load_inner(settings: &EmbeddingSettings) -> anyhow::Result<Self> {
        let device = device::select_device();
        let model_dir = settings.model_dir.as_path();
        if !model_dir.exists() {
            return Err(anyhow!("model directory {} does not exist", model_dir.display()));
        }
        info!(model = %settings.model_name, dir = %model_dir.display(), "loading embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        tokenize::configure_tokenizer(&mut tokenizer, settings.max_len)?;

        let config_path = model_dir.join("config.json");
        let config_text = std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?;
        let config: BertConfig = serde_json::from_str(&config_text)?;
        let raw: serde_json::Value = serde_json::from_str(&config_text)?;
        let dim = raw
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .and_then(|d| usize::try_from(d).ok())
            .ok_or_else(|| anyhow!("config.json has no hidden_size"))?;

        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = BertModel::load(vb, &config)?;
        let model_id = format!("bert:{}:d{}", settings.model_name, dim);
        info!(model_id = %model_id, "embedding model loaded");
        Ok(Self { model, tokenizer, device, model_id, dim, max_len: settings.max_len, max_input_chars: settings.max_input_chars })
    }

    fn embed_chunk(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let batch = tokenize::tokenize_batch(&self.tokenizer, texts, &self.device)?;
        let hidden = self.model.forward(&batch.input_ids, &batch.token_type_ids, Some(&batch.attention_mask))?;
        let pooled = masked_mean_l2(&hidden, &batch.attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis(), "embedded batch");
        Ok(vectors)
    }
}

impl Embedder for BertEmbedder {
    fn model_id(&self) -> &str { &self.model_id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        validate_inputs(texts, self.max_input_chars)?;
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH_SIZE) {
            let vectors = self.embed_chunk(chunk).map_err(|e| Error::Embedding(format!("{e:#}")))?;
            out.extend(vectors);
        }
        if out.len() != texts.len() {
            return Err(Error::Embedding(format!("expected {} vectors, model returned {}", texts.len(), out.len())));
        }
        Ok(out)
    }
}

/// Prefer `model.safetensors`; fall back to the PyTorch pickle.
fn load_weights(model_dir: &Path, device: &Device) -> anyhow::Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        debug!(path = %safetensors.display(), "loading safetensors weights");
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    if pickle.exists() {
        debug!(path = %pickle.display(), "loading pytorch weights");
        let weights = candle_core::pickle::read_all(&pickle)?;
        return Ok(weights.into_iter().collect());
    }
    Err(anyhow!("no model.safetensors or pytorch_model.bin in {}", model_dir.display()))
}

/// Hashes lower-cased alphanumeric tokens into `dim` buckets and L2-normalises.
/// Identical text gives identical vectors; texts sharing words score positively.
pub struct FakeEmbedder {
    dim: usize,
    model_id: String,
    max_input_chars: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim, model_id: format!("fake:xxhash:d{dim}"), max_input_chars: DEFAULT_MAX_INPUT_CHARS }
    }

    #[must_use]
    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut tokens: Vec<&str> = lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() { tokens.push(lowered.trim()); }

        let mut v = vec![0f32; self.dim];
        for token in tokens {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h % self.dim as u64) as usize;
            #[allow(clippy::cast_precision_loss)]
            let weight = 1.0 + ((h >> 32) as f32) / (u32::MAX as f32);
            v[idx] += weight;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn model_id(&self) -> &str { &self.model_id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        validate_inputs(texts, self.max_input_chars)?;
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fake_requested_by_env() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Build the configured embedder. The loaded model must produce
/// `settings.dimension`-sized vectors.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if settings.use_fake || fake_requested_by_env() {
        warn!(dim = settings.dimension, "using FakeEmbedder; retrieval quality is lexical only");
        return Ok(Arc::new(FakeEmbedder::new(settings.dimension).with_max_input_chars(settings.max_input_chars)));
    }
    let embedder = BertEmbedder::load(settings)?;
    if embedder.dim() != settings.dimension {
        return Err(Error::DimensionMismatch { expected: settings.dimension, actual: embedder.dim() });
    }
    Ok(Arc::new(embedder))
}
