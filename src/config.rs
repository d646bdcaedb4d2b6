//! Runtime configuration
//!
//! Everything is read from the process environment. Binaries load `.env`
//! through `dotenv` before calling [`AppConfig::from_env`].

use crate::error::{Nl2SqlError, Result};
use crate::query_runner::RetryPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    /// Offline feature-hashing embedder
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint
    OpenAi,
}

impl FromStr for EmbeddingProviderKind {
    type Err = Nl2SqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hashing" | "local" => Ok(Self::Hashing),
            "openai" => Ok(Self::OpenAi),
            other => Err(Nl2SqlError::Config(format!(
                "Unknown EMBEDDING_PROVIDER '{}' (expected 'hashing' or 'openai')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub top_k: usize,
    pub prompt_schema_char_budget: usize,
    pub retry: RetryPolicy,
    pub schema_annotations_path: Option<PathBuf>,
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("EMBEDDING_PROVIDER") {
            Some(v) => v.parse()?,
            None => EmbeddingProviderKind::Hashing,
        };
        let default_dims = match provider {
            EmbeddingProviderKind::Hashing => 1024,
            EmbeddingProviderKind::OpenAi => 1536,
        };

        let llm_api_key = get("LLM_API_KEY")
            .or_else(|| get("DEEPSEEK_API_KEY"))
            .or_else(|| get("OPENAI_API_KEY"));

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "QUERY_MAX_ATTEMPTS", 3u32)?.max(1),
            backoff: Duration::from_millis(parse_or(&get, "QUERY_RETRY_BACKOFF_MS", 200u64)?),
            empty_on_exhausted: parse_bool_or(&get, "QUERY_EMPTY_ON_EXHAUSTED", false)?,
        };

        Ok(Self {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://data/example.db".to_string()),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 4u32)?.max(1),
            db_acquire_timeout: Duration::from_secs(parse_or(&get, "DB_ACQUIRE_TIMEOUT_SECS", 10u64)?),
            llm: LlmConfig {
                api_key: llm_api_key,
                base_url: get("LLM_BASE_URL")
                    .unwrap_or_else(|| "https://api.deepseek.com".to_string()),
                model: get("LLM_MODEL").unwrap_or_else(|| "deepseek-chat".to_string()),
                max_tokens: parse_or(&get, "LLM_MAX_TOKENS", 256u32)?,
                timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 30u64)?),
            },
            embedding: EmbeddingConfig {
                provider,
                base_url: get("EMBEDDING_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                model: get("EMBEDDING_MODEL")
                    .unwrap_or_else(|| "text-embedding-3-small".to_string()),
                api_key: get("EMBEDDING_API_KEY").or_else(|| get("OPENAI_API_KEY")),
                dimensions: parse_or(&get, "EMBEDDING_DIMENSIONS", default_dims)?,
            },
            top_k: parse_or(&get, "RAG_TOP_K", 5usize)?,
            prompt_schema_char_budget: parse_or(&get, "PROMPT_SCHEMA_CHAR_BUDGET", 6000usize)?,
            retry,
            schema_annotations_path: get("SCHEMA_ANNOTATIONS_PATH").map(PathBuf::from),
            bind_addr: get("SERVER_BIND").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Nl2SqlError::Config(format!("{} = '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Nl2SqlError::Config(format!("{} = '{}' is not a boolean", key, raw))),
        },
        None => Ok(default),
    }
}
