use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("CLASSRANK_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            if let Some(patch) = Self::load_patch(&path)? {
                config.merge_patch(patch);
            }
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(project) = Self::load_patch(Path::new("classrank.toml"))? {
                config.merge_patch(project);
            }
        }

        config.apply_env_overrides()?;

        Ok(config)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        let Some(dir) = dirs::config_dir() else {
            return Ok(None);
        };
        Self::load_patch(&dir.join("classrank/config.toml"))
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| EngineError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.cache {
            self.cache.merge(patch);
        }
        if let Some(patch) = patch.search {
            self.search.merge(patch);
        }
        if let Some(patch) = patch.backend {
            self.backend.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if env_bool("CLASSRANK_CACHE_DISABLED").unwrap_or(false) {
            self.cache.enabled = false;
        }
        if let Some(value) = env_string("CLASSRANK_DB") {
            self.cache.db_path = Some(PathBuf::from(value));
        }
        if let Some(value) = env_duration("CLASSRANK_CACHE_FRESHNESS")? {
            self.cache.freshness = value;
        }
        if let Some(value) = env_duration("CLASSRANK_COLD_LOAD_TIMEOUT")? {
            self.cache.cold_load_timeout = value;
        }

        if let Some(value) = env_usize("CLASSRANK_EMBEDDING_DIMS")? {
            self.search.embedding_dims = value;
        }
        if let Some(value) = env_f32("CLASSRANK_MIN_SIMILARITY")? {
            self.search.min_similarity = value;
        }
        if let Some(value) = env_usize("CLASSRANK_DEFAULT_LIMIT")? {
            self.search.default_limit = value;
        }

        if let Some(value) = env_string("CLASSRANK_CATALOG") {
            self.backend.catalog_path = Some(PathBuf::from(value));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Snapshots older than this trigger a background refresh on access.
    #[serde(default, with = "humantime_serde")]
    pub freshness: Duration,
    /// Upper bound on a blocking cold load before it surfaces a retryable
    /// timeout. Background refreshes have no deadline.
    #[serde(default, with = "humantime_serde")]
    pub cold_load_timeout: Duration,
    /// Durable cache location; `None` resolves to the platform data dir.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            freshness: Duration::from_secs(6 * 60 * 60),
            cold_load_timeout: Duration::from_secs(30),
            db_path: None,
        }
    }
}

impl CacheConfig {
    fn merge(&mut self, patch: CachePatch) {
        if let Some(value) = patch.enabled {
            self.enabled = value;
        }
        if let Some(value) = patch.freshness {
            self.freshness = value;
        }
        if let Some(value) = patch.cold_load_timeout {
            self.cold_load_timeout = value;
        }
        if let Some(value) = patch.db_path {
            self.db_path = Some(value);
        }
    }

    /// Resolved database path: configured location or the platform data dir.
    #[must_use]
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("classrank/cache.db")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub embedding_dims: usize,
    /// Cosine floor below which topic matches are discarded as irrelevant.
    #[serde(default)]
    pub min_similarity: f32,
    /// Minimum query length before free-text search activates.
    #[serde(default)]
    pub min_query_len: usize,
    #[serde(default)]
    pub default_limit: usize,
    /// `top_k` passed to the vector index for topic search; 0 means "cover
    /// the whole catalog".
    #[serde(default)]
    pub topic_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            embedding_dims: 384,
            min_similarity: 0.75,
            min_query_len: 2,
            default_limit: 20,
            topic_top_k: 0,
        }
    }
}

impl SearchConfig {
    fn merge(&mut self, patch: SearchPatch) {
        if let Some(value) = patch.embedding_dims {
            self.embedding_dims = value;
        }
        if let Some(value) = patch.min_similarity {
            self.min_similarity = value;
        }
        if let Some(value) = patch.min_query_len {
            self.min_query_len = value;
        }
        if let Some(value) = patch.default_limit {
            self.default_limit = value;
        }
        if let Some(value) = patch.topic_top_k {
            self.topic_top_k = value;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Path to the catalog JSON file served by the file backend.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

impl BackendConfig {
    fn merge(&mut self, patch: BackendPatch) {
        if let Some(value) = patch.catalog_path {
            self.catalog_path = Some(value);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub cache: Option<CachePatch>,
    pub search: Option<SearchPatch>,
    pub backend: Option<BackendPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CachePatch {
    pub enabled: Option<bool>,
    #[serde(default, with = "humantime_serde::option")]
    pub freshness: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub cold_load_timeout: Option<Duration>,
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SearchPatch {
    pub embedding_dims: Option<usize>,
    pub min_similarity: Option<f32>,
    pub min_query_len: Option<usize>,
    pub default_limit: Option<usize>,
    pub topic_top_k: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BackendPatch {
    pub catalog_path: Option<PathBuf>,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<usize>()
            .map(Some)
            .map_err(|err| EngineError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn env_f32(key: &str) -> Result<Option<f32>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<f32>()
            .map(Some)
            .map_err(|err| EngineError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn env_duration(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(value) => humantime::parse_duration(&value)
            .map(Some)
            .map_err(|err| EngineError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}
