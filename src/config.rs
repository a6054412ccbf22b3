//! Runtime configuration (spec §6 "Environment toggles"). Loaded from an
//! optional TOML file with CLI flags overriding file values, using
//! `toml_edit` (teacher dependency, repurposed here from Cargo.toml editing
//! to reading a small immutable config document).

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::{CoreError, FailureKind};

/// Configuration record enumerated exactly per spec §6. No other
/// environment-variable-equivalent option is part of the core's surface.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CoreConfig {
    pub pool_mount_path: PathBuf,
    pub sign_uploads: bool,
    pub max_build_age_days: u32,
    pub tarball_cache_max_age_days: u32,
    pub parallel_workers: usize,
    pub worker_timeout_seconds: u64,
    pub allow_recursive_builds: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            pool_mount_path: PathBuf::from("./pool"),
            sign_uploads: false,
            max_build_age_days: 30,
            tarball_cache_max_age_days: 90,
            parallel_workers: 1,
            worker_timeout_seconds: 3600,
            allow_recursive_builds: false,
        }
    }
}

impl CoreConfig {
    /// Load from a TOML file, falling back to defaults for any field it
    /// omits. Unknown keys are ignored (forward compatible).
    pub fn load_from_file(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))
            .map_err(|e| CoreError::new(FailureKind::ConfigError, e.to_string()))?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, CoreError> {
        let doc: toml_edit::Document =
            text.parse().map_err(|e: toml_edit::TomlError| CoreError::new(FailureKind::ConfigError, e.to_string()))?;
        let mut config = CoreConfig::default();

        if let Some(v) = doc.get("pool_mount_path").and_then(|i| i.as_str()) {
            config.pool_mount_path = PathBuf::from(v);
        }
        if let Some(v) = doc.get("sign_uploads").and_then(|i| i.as_bool()) {
            config.sign_uploads = v;
        }
        if let Some(v) = doc.get("max_build_age_days").and_then(|i| i.as_integer()) {
            config.max_build_age_days = v.max(0) as u32;
        }
        if let Some(v) = doc.get("tarball_cache_max_age_days").and_then(|i| i.as_integer()) {
            config.tarball_cache_max_age_days = v.max(0) as u32;
        }
        if let Some(v) = doc.get("parallel_workers").and_then(|i| i.as_integer()) {
            config.parallel_workers = v.max(1) as usize;
        }
        if let Some(v) = doc.get("worker_timeout_seconds").and_then(|i| i.as_integer()) {
            config.worker_timeout_seconds = v.max(0) as u64;
        }
        if let Some(v) = doc.get("allow_recursive_builds").and_then(|i| i.as_bool()) {
            config.allow_recursive_builds = v;
        }

        Ok(config)
    }

    /// Apply CLI-flag overrides on top of whatever the file (or defaults)
    /// supplied. `None` leaves the existing value untouched.
    pub fn with_overrides(mut self, parallel_workers: Option<usize>, worker_timeout_seconds: Option<u64>) -> Self {
        if let Some(v) = parallel_workers {
            self.parallel_workers = v;
        }
        if let Some(v) = worker_timeout_seconds {
            self.worker_timeout_seconds = v;
        }
        self
    }
}
