//! Build tree configuration
//!
//! Reads settings for the worker pool and the registry from a TOML file.
//! A missing file yields the defaults; the file location can be set with
//! the `BUILDTREE_CONFIG` environment variable.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config::defaults::{CANONICALIZE_ROOTS, ENV_CONFIG_PATH, WORKER_POOL_NAME};
use crate::error::ConfigError;

/// Configuration of one build tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildTreeConfig {
    /// Worker pool settings
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Registry settings
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Pool name, also the prefix of worker thread names
    pub name: Option<String>,

    /// Stack size of worker threads in bytes
    pub stack_size: Option<usize>,
}

/// Registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Resolve root directories through the filesystem before deduplication
    pub canonicalize_roots: Option<bool>,
}

impl BuildTreeConfig {
    /// Load configuration from `$BUILDTREE_CONFIG`, or defaults when unset
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(ENV_CONFIG_PATH) {
            Some(path) => Self::load_from_path(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    ///
    /// If the file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` if the file contains invalid TOML.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: "<inline>".to_string(),
            error: e.to_string(),
        })
    }

    /// Effective worker pool name
    #[must_use]
    pub fn worker_pool_name(&self) -> &str {
        self.workers.name.as_deref().unwrap_or(WORKER_POOL_NAME)
    }

    /// Effective worker stack size, `None` for the platform default
    #[must_use]
    pub fn worker_stack_size(&self) -> Option<usize> {
        self.workers.stack_size
    }

    /// Whether root directories are canonicalized
    #[must_use]
    pub fn canonicalize_roots(&self) -> bool {
        self.registry
            .canonicalize_roots
            .unwrap_or(CANONICALIZE_ROOTS)
    }
}
