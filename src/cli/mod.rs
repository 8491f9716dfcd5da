#![forbid(unsafe_code)]

//! TOML configuration for the `pagebuf` binary.
//!
//! A missing file yields the defaults; a malformed one is an error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::BufferOptions;
use crate::primitives::pager::EvictionPolicy;
use crate::primitives::prefetch::PrefetchStrategy;

/// Buffer settings read from a config file.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TextBufferConfig {
    /// Whether files above [`Self::large_file_threshold_bytes`] should be paged.
    pub use_virtualized_buffer_for_large_files: bool,
    /// Size in bytes from which a file counts as large.
    pub large_file_threshold_bytes: u64,
    /// Lines per page.
    pub default_page_size: usize,
    /// Maximum resident pages.
    pub default_cache_size: usize,
    /// Memory ceiling in MiB; caps the page budget together with the page size.
    pub max_memory_usage_mb: usize,
    /// Whether the prefetcher runs at all.
    pub prefetch_enabled: bool,
    /// Pages prefetched on each side of an access.
    pub prefetch_window_size: usize,
    /// Eviction policy name (`lru`, `slru`, `arc`, `spatial`).
    pub eviction_policy: Option<String>,
    /// Prefetch strategy name (`none`, `adjacent`, `predictive`, `adaptive`).
    pub prefetch_strategy: Option<String>,
}

impl Default for TextBufferConfig {
    fn default() -> Self {
        Self {
            use_virtualized_buffer_for_large_files: true,
            large_file_threshold_bytes: 10 * 1024 * 1024,
            default_page_size: 1000,
            default_cache_size: 10,
            max_memory_usage_mb: 200,
            prefetch_enabled: true,
            prefetch_window_size: 5,
            eviction_policy: None,
            prefetch_strategy: None,
        }
    }
}

/// Rough per-line footprint used to turn the memory ceiling into pages.
const ESTIMATED_LINE_BYTES: usize = 128;

impl TextBufferConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Serializes to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }

    /// Whether a file of `len` bytes should be opened as a paged buffer.
    pub fn prefers_virtualized(&self, len: u64) -> bool {
        self.use_virtualized_buffer_for_large_files && len >= self.large_file_threshold_bytes
    }

    /// Buffer options described by this config.
    pub fn buffer_options(&self) -> Result<BufferOptions, ConfigError> {
        let eviction_policy = match self.eviction_policy.as_deref() {
            Some(name) => EvictionPolicy::from_str(name).ok_or_else(|| ConfigError::UnknownValue {
                field: "eviction_policy",
                value: name.to_string(),
            })?,
            None => EvictionPolicy::default(),
        };
        let prefetch_strategy = if !self.prefetch_enabled {
            PrefetchStrategy::None
        } else {
            match self.prefetch_strategy.as_deref() {
                Some(name) => {
                    PrefetchStrategy::from_str(name).ok_or_else(|| ConfigError::UnknownValue {
                        field: "prefetch_strategy",
                        value: name.to_string(),
                    })?
                }
                None => PrefetchStrategy::default(),
            }
        };
        let page_bytes = self.default_page_size.saturating_mul(ESTIMATED_LINE_BYTES).max(1);
        let memory_pages = (self.max_memory_usage_mb.saturating_mul(1024 * 1024) / page_bytes).max(1);
        let options = BufferOptions {
            page_size: self.default_page_size,
            cache_size: self.default_cache_size.min(memory_pages),
            prefetch_distance: self.prefetch_window_size,
            eviction_policy,
            prefetch_strategy,
            ..BufferOptions::default()
        };
        options
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(options)
    }
}

/// Default config location: `<config dir>/pagebuf/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("pagebuf").join("config.toml"))
}

/// Failures loading or interpreting a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// The config could not be rendered as TOML.
    #[error("failed to serialize config: {source}")]
    Serialize {
        /// Underlying error.
        source: toml::ser::Error,
    },
    /// A named setting holds a value outside its set.
    #[error("unknown {field} '{value}'")]
    UnknownValue {
        /// Setting name.
        field: &'static str,
        /// Rejected value.
        value: String,
    },
    /// The resulting buffer options were rejected.
    #[error("invalid buffer options: {0}")]
    Invalid(String),
}
