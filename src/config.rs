use std::collections::HashSet;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use tracing::Level;

use crate::pipeline::validator::ValidationConfig;

/// Connection and sampling settings for the OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// Retrieval knobs admins can change at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub relevance_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            relevance_threshold: 0.2,
        }
    }
}

impl RetrievalConfig {
    pub fn check(&self) -> Result<()> {
        if self.top_k == 0 {
            bail!("top_k must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            bail!("relevance_threshold must be between 0 and 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub discord_token: String,
    pub guild_id: Option<u64>,
    pub admin_ids: HashSet<u64>,
    pub data_dir: PathBuf,
    pub log_level: Level,
    pub llm: LlmSettings,
    pub retrieval: RetrievalConfig,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub validation: ValidationConfig,
}

impl Settings {
    /// Read settings from the process environment, loading `.env` first.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let discord_token = get("DISCORD_TOKEN").ok_or_else(|| anyhow!("DISCORD_TOKEN required"))?;
        let guild_id = parse_opt(&get, "DISCORD_GUILD_ID")?;
        let admin_ids = match get("ADMIN_USER_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>()
                        .map_err(|e| anyhow!("Invalid ADMIN_USER_IDS entry {:?}: {}", s, e))
                })
                .collect::<Result<HashSet<_>>>()?,
            None => HashSet::new(),
        };

        let llm = LlmSettings {
            base_url: get("LLM_BASE_URL").unwrap_or_else(|| "http://localhost:1234/v1".to_string()),
            model: get("LLM_MODEL").unwrap_or_else(|| "qwen/qwen3-8b".to_string()),
            api_key: get("LLM_API_KEY"),
            temperature: parse_or(&get, "LLM_TEMPERATURE", 0.1)?,
            max_tokens: parse_or(&get, "LLM_MAX_TOKENS", 8192)?,
            timeout_secs: parse_or(&get, "LLM_TIMEOUT_SECS", 120)?,
        };

        let defaults = RetrievalConfig::default();
        let retrieval = RetrievalConfig {
            top_k: parse_or(&get, "TOP_K_RESULTS", defaults.top_k)?,
            relevance_threshold: parse_or(&get, "RELEVANCE_THRESHOLD", defaults.relevance_threshold)?,
        };
        retrieval.check()?;

        let chunk_size: usize = parse_or(&get, "CHUNK_SIZE", 800)?;
        let chunk_overlap: usize = parse_or(&get, "CHUNK_OVERLAP", 100)?;
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            bail!("CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})", chunk_overlap, chunk_size);
        }

        let validation_defaults = ValidationConfig::default();
        let validation = ValidationConfig {
            relative_tolerance: parse_or(&get, "VALIDATION_TOLERANCE", validation_defaults.relative_tolerance)?,
            magnitude_ceiling: parse_or(
                &get,
                "VALIDATION_MAGNITUDE_CEILING",
                validation_defaults.magnitude_ceiling,
            )?,
        };
        validation.check()?;

        Ok(Self {
            discord_token,
            guild_id,
            admin_ids,
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./data/corpus")),
            log_level: parse_or(&get, "LOG_LEVEL", Level::INFO)?,
            llm,
            retrieval,
            chunk_size,
            chunk_overlap,
            validation,
        })
    }
}

fn parse_opt<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| anyhow!("Invalid {} {:?}: {}", key, raw, e))
        })
        .transpose()
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}
