//! Explorer configuration.

use std::env;
use std::path::{Path, PathBuf};

use climate_common::{ExplorerError, ExplorerResult};
use grid_processor::CodecConfig;
use serde::{Deserialize, Serialize};
use storage::EvictionPolicy;

/// Top-level explorer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Root of the artifact cache (`datasets/`, `layers/`, `series/`).
    pub cache_dir: PathBuf,

    /// SQLite catalog database.
    pub database_path: PathBuf,

    /// Optional YAML catalog used instead of the database.
    pub catalog_file: Option<PathBuf>,

    /// Serialize concurrent misses on the same cache key.
    pub single_flight: bool,

    /// Datasets kept decoded in memory (0 disables).
    pub memory_cache_entries: usize,

    /// Codec for dataset and layer artifacts.
    pub codec: CodecConfig,

    /// Limits applied by `cache prune`.
    pub eviction: EvictionPolicy,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            database_path: PathBuf::from("database/climate_studio.db"),
            catalog_file: None,
            single_flight: true,
            memory_cache_entries: 4,
            codec: CodecConfig::default(),
            eviction: EvictionPolicy::default(),
        }
    }
}

fn env_flag(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes")
}

impl ExplorerConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Load a YAML file, then apply environment overrides.
    pub fn from_yaml(path: &Path) -> ExplorerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExplorerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: ExplorerConfig = serde_yaml::from_str(&content)
            .map_err(|e| ExplorerError::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        Ok(config.apply_env())
    }

    /// Override fields from environment variables. Unparsable values are ignored.
    pub fn apply_env(mut self) -> Self {
        if let Ok(val) = env::var("EXPLORER_CACHE_DIR") {
            self.cache_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("EXPLORER_DATABASE") {
            self.database_path = PathBuf::from(val);
        }

        if let Ok(val) = env::var("EXPLORER_CATALOG_FILE") {
            self.catalog_file = (!val.is_empty()).then(|| PathBuf::from(val));
        }

        if let Ok(val) = env::var("EXPLORER_SINGLE_FLIGHT") {
            self.single_flight = env_flag(&val);
        }

        if let Ok(val) = env::var("EXPLORER_MEMORY_CACHE_ENTRIES") {
            if let Ok(n) = val.parse() {
                self.memory_cache_entries = n;
            }
        }

        if let Ok(val) = env::var("CACHE_MAX_BYTES") {
            if let Ok(n) = val.parse() {
                self.eviction.max_bytes = Some(n);
            }
        }

        if let Ok(val) = env::var("CACHE_MAX_AGE_HOURS") {
            if let Ok(n) = val.parse() {
                self.eviction.max_age_hours = Some(n);
            }
        }

        self.codec = self.codec.apply_env();
        self
    }

    pub fn validate(&self) -> ExplorerResult<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ExplorerError::Config("cache_dir must be set".to_string()));
        }

        if self.catalog_file.is_none() && self.database_path.as_os_str().is_empty() {
            return Err(ExplorerError::Config(
                "either database_path or catalog_file must be set".to_string(),
            ));
        }

        if self.eviction.max_bytes == Some(0) {
            return Err(ExplorerError::Config("eviction.max_bytes must be > 0".to_string()));
        }

        self.codec.validate().map_err(ExplorerError::Config)
    }
}
