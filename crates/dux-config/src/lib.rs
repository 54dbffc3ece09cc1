//! # dux-config
//!
//! Configuration, logging and path helpers shared across the `dux`
//! directory-sizing engine crates.
//!
//! Config is loaded from:
//! 1. `~/.config/dux/config.toml` (global), if present
//! 2. `DUX_*` environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Tunables for the concurrency core (C1-C5). Every field has a default
/// matching the values called out in the design: a 20-slot semaphore for
/// directory reads, a 20-slot semaphore per session, and a 200ms publish
/// tick for the recursive sizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory the engine scans when a session requests no explicit path.
    pub initial_dir: Option<PathBuf>,
    /// Concurrent blocking `readdir` calls allowed process-wide.
    pub fs_read_concurrency: usize,
    /// Concurrent directory-child subscriptions a single session may hold open.
    pub session_concurrency: usize,
    /// How often a sizer re-publishes its running total, in milliseconds.
    pub publish_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_dir: None,
            fs_read_concurrency: 20,
            session_concurrency: 20,
            publish_interval_ms: 200,
        }
    }
}

impl EngineConfig {
    /// Load from `~/.config/dux/config.toml`, if present, then apply
    /// `DUX_*` environment overrides. Never fails: a missing or malformed
    /// file falls back to defaults (with a logged warning).
    pub fn load() -> Self {
        let mut config = Self::global_config_path()
            .filter(|p| p.exists())
            .and_then(|p| match Self::from_file(&p) {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "failed to parse dux config, using defaults");
                    None
                }
            })
            .unwrap_or_default();

        config.apply_env_overrides();
        config
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading dux config");
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("dux").join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("DUX_INITIAL_DIR") {
            self.initial_dir = Some(PathBuf::from(dir));
        }
        if let Ok(n) = std::env::var("DUX_FS_READ_CONCURRENCY") {
            if let Ok(n) = n.parse() {
                self.fs_read_concurrency = n;
            }
        }
        if let Ok(n) = std::env::var("DUX_SESSION_CONCURRENCY") {
            if let Ok(n) = n.parse() {
                self.session_concurrency = n;
            }
        }
        if let Ok(ms) = std::env::var("DUX_PUBLISH_INTERVAL_MS") {
            if let Ok(ms) = ms.parse() {
                self.publish_interval_ms = ms;
            }
        }
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Lock for tests that modify environment variables to prevent race
    // conditions when tests run in parallel.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn defaults_match_design() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.fs_read_concurrency, 20);
        assert_eq!(cfg.session_concurrency, 20);
        assert_eq!(cfg.publish_interval(), Duration::from_millis(200));
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = ENV_LOCK.lock().unwrap(); // Serialize env tests
        std::env::set_var("DUX_FS_READ_CONCURRENCY", "7");
        let mut cfg = EngineConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.fs_read_concurrency, 7);
        std::env::remove_var("DUX_FS_READ_CONCURRENCY");
    }
}
