//! Runtime settings read from the environment

use crate::answerer::DEFAULT_TOP_K;
use crate::chunker::{ChunkerConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::extractor::{ExtractorConfig, DEFAULT_MIN_PAGE_CHARS, DEFAULT_OCR_DPI};
use crate::indexer::DEFAULT_EMBED_BATCH_SIZE;
use crate::pool::DEFAULT_IDLE_TIMEOUT;
use crate::provider::{
    ModelClient, ProviderKind, DEFAULT_CHAT_MODEL, DEFAULT_EMBED_MODEL, DEFAULT_OLLAMA_URL,
    DEFAULT_OPENAI_URL,
};
use crate::{AgentError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DOCUMENT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse::<T>().map_err(|_| {
            AgentError::Validation(format!("{} has an invalid value: {}", key, value))
        }),
        Err(_) => Ok(default),
    }
}

/// Which sessions an upload invalidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidationPolicy {
    /// Only the uploading user's session
    #[default]
    Uploader,
    /// Every session of the agent that read an older index
    Agent,
}

impl FromStr for InvalidationPolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uploader" | "user" => Ok(InvalidationPolicy::Uploader),
            "agent" | "all" => Ok(InvalidationPolicy::Agent),
            other => Err(AgentError::Validation(format!(
                "Unknown invalidation policy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embed_model: String,
}

impl ProviderSettings {
    /// HTTP client for the configured provider and models
    pub fn client(&self) -> ModelClient {
        match self.kind {
            ProviderKind::OpenAi => ModelClient::openai(&self.base_url, self.api_key.clone()),
            ProviderKind::Ollama => ModelClient::ollama(&self.base_url),
        }
        .with_models(&self.chat_model, &self.embed_model)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub provider: ProviderSettings,
    pub extractor: ExtractorConfig,
    pub tesseract_bin: String,
    pub pdftoppm_bin: String,
    pub chunker: ChunkerConfig,
    pub top_k: usize,
    pub idle_timeout: Duration,
    pub reaper_interval: Duration,
    pub document_timeout: Option<Duration>,
    pub embed_batch_size: usize,
    pub invalidation: InvalidationPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|home| home.join(".agentdesk"))
            .unwrap_or_else(|| PathBuf::from(".agentdesk"));

        Self {
            data_dir,
            provider: ProviderSettings {
                kind: ProviderKind::OpenAi,
                base_url: DEFAULT_OPENAI_URL.to_string(),
                api_key: None,
                chat_model: DEFAULT_CHAT_MODEL.to_string(),
                embed_model: DEFAULT_EMBED_MODEL.to_string(),
            },
            extractor: ExtractorConfig::default(),
            tesseract_bin: "tesseract".to_string(),
            pdftoppm_bin: "pdftoppm".to_string(),
            chunker: ChunkerConfig::default(),
            top_k: DEFAULT_TOP_K,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            document_timeout: Some(Duration::from_secs(DEFAULT_DOCUMENT_TIMEOUT_SECS)),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            invalidation: InvalidationPolicy::default(),
        }
    }
}

impl Settings {
    /// Read settings from the environment, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let kind: ProviderKind = env_or_default("MODEL_PROVIDER", "openai").parse()?;
        let default_url = match kind {
            ProviderKind::OpenAi => DEFAULT_OPENAI_URL,
            ProviderKind::Ollama => DEFAULT_OLLAMA_URL,
        };
        let provider = ProviderSettings {
            kind,
            base_url: env_or_default("MODEL_BASE_URL", default_url),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            chat_model: env_or_default("CHAT_MODEL", &defaults.provider.chat_model),
            embed_model: env_or_default("EMBED_MODEL", &defaults.provider.embed_model),
        };

        let data_dir = std::env::var("AGENTDESK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let chunker = ChunkerConfig {
            chunk_size: env_parse("CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            overlap: env_parse("CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
        };
        chunker.validate()?;

        let document_timeout_secs =
            env_parse("DOCUMENT_TIMEOUT_SECS", DEFAULT_DOCUMENT_TIMEOUT_SECS)?;

        Ok(Self {
            data_dir,
            provider,
            extractor: ExtractorConfig {
                min_page_chars: env_parse("OCR_MIN_PAGE_CHARS", DEFAULT_MIN_PAGE_CHARS)?,
                ocr_dpi: env_parse("OCR_DPI", DEFAULT_OCR_DPI)?,
            },
            tesseract_bin: env_or_default("TESSERACT_BIN", &defaults.tesseract_bin),
            pdftoppm_bin: env_or_default("PDFTOPPM_BIN", &defaults.pdftoppm_bin),
            chunker,
            top_k: env_parse("RETRIEVAL_TOP_K", DEFAULT_TOP_K)?.max(1),
            idle_timeout: Duration::from_secs(
                env_parse("SESSION_IDLE_MINUTES", DEFAULT_IDLE_TIMEOUT.as_secs() / 60)? * 60,
            ),
            reaper_interval: defaults.reaper_interval,
            // 0 disables the bound
            document_timeout: (document_timeout_secs > 0)
                .then(|| Duration::from_secs(document_timeout_secs)),
            embed_batch_size: env_parse("EMBED_BATCH_SIZE", DEFAULT_EMBED_BATCH_SIZE)?.max(1),
            invalidation: env_or_default("INVALIDATION_POLICY", "uploader").parse()?,
        })
    }

    /// Builder pattern: set data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Where the SurrealDB files live
    pub fn db_dir(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    /// Where per-agent vector indexes live
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}
