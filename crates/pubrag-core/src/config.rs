//! Configuration loader, typed settings, and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates sections, e.g. `APP_LLM__MODEL`). Every setting has a
//! default, so a missing config file is not an error.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::GenerationOptions;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    /// Extract, validate, and path-resolve the full settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if settings.llm.api_key.as_deref().map_or(true, str::is_empty) {
            settings.llm.api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        }
        settings.validate()?;
        let base = env::current_dir()?;
        settings.resolve_paths(&base);
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub store: StoreSettings,
    pub llm: LlmSettings,
    pub retrieval: RetrievalSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(Error::InvalidConfig("embedding.dimension must be positive".into()));
        }
        if self.embedding.max_len == 0 {
            return Err(Error::InvalidConfig("embedding.max_len must be positive".into()));
        }
        if self.retrieval.default_top_k == 0 || self.retrieval.default_top_k > self.retrieval.max_top_k {
            return Err(Error::InvalidConfig(format!(
                "retrieval.default_top_k must be within 1..={}",
                self.retrieval.max_top_k
            )));
        }
        if self.llm.timeout_secs == 0 {
            return Err(Error::InvalidConfig("llm.timeout_secs must be positive".into()));
        }
        if self.index.table.trim().is_empty() {
            return Err(Error::InvalidConfig("index.table must not be empty".into()));
        }
        Ok(())
    }

    /// Expand `~`/`${VAR}` in every configured path and anchor relative ones at `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        self.embedding.model_dir = resolve_with_base(base, self.embedding.model_dir.to_string_lossy());
        self.index.path = resolve_with_base(base, self.index.path.to_string_lossy());
        self.store.path = resolve_with_base(base, self.store.path.to_string_lossy());
        if let Some(raw) = self.store.raw_documents_dir.take() {
            self.store.raw_documents_dir = Some(resolve_with_base(base, raw.to_string_lossy()));
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_name: String,
    pub model_dir: PathBuf,
    pub dimension: usize,
    /// Token window; longer inputs are truncated.
    pub max_len: usize,
    /// Inputs longer than this many characters are rejected.
    pub max_input_chars: usize,
    pub use_fake: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_name: "all-MiniLM-L6-v2".to_string(),
            model_dir: PathBuf::from("models/all-MiniLM-L6-v2"),
            dimension: 384,
            max_len: 256,
            max_input_chars: 20_000,
            use_fake: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub path: PathBuf,
    pub table: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { path: PathBuf::from("data/processed/vector_store.lance"), table: "documents".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub raw_documents_dir: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { path: PathBuf::from("data/processed/documents.json"), raw_documents_dir: Some(PathBuf::from("data/raw")) }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        let gen = GenerationOptions::default();
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: None,
            temperature: gen.temperature,
            max_tokens: gen.max_tokens,
            top_p: gen.top_p,
            frequency_penalty: gen.frequency_penalty,
            presence_penalty: gen.presence_penalty,
            timeout_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl LlmSettings {
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: Some(self.model.clone()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
        }
    }
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { default_top_k: 3, max_top_k: 20 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
