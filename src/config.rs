//! Engine configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILKEEP_CONFIG` (environment variable)
//! 2. `~/.config/mailkeep/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailkeep\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Folder locking tunables.
    pub lock: LockConfig,
    /// Mailbox scanning tunables.
    pub scan: ScanConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Folder locking tunables.
///
/// All three locking mechanisms are non-blocking at the OS level; the
/// retry counts and delay below bound how long a caller may sleep before
/// a lock attempt gives up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Attempts to claim the dot-lock file before giving up.
    pub dot_retries: u32,
    /// Attempts of the full record→flock→dot sequence before giving up.
    pub folder_retries: u32,
    /// Delay between attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Age in seconds past which an existing lock file is presumed
    /// abandoned by a crashed holder and forcibly removed.
    pub stale_lock_secs: u64,
}

/// Mailbox scanning tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum bytes read from a message file when extracting its headers.
    pub header_read_budget: usize,
    /// Report progress every N messages during a scan.
    pub progress_interval: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dot_retries: 5,
            folder_retries: 3,
            retry_delay_ms: 2000,
            stale_lock_secs: 60,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            header_read_budget: 64 * 1024, // 64 KB
            progress_interval: 64,
        }
    }
}

impl LockConfig {
    /// Delay between lock attempts as a `Duration`.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Resolve the config file path.
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILKEEP_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|p| p.join("mailkeep/config.toml"))
}

/// Resolve the cache directory (for logs).
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("mailkeep")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.lock.dot_retries > 0);
        assert!(cfg.lock.stale_lock_secs > 0);
        assert!(cfg.scan.header_read_budget >= 4096);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: Config = toml::from_str("[lock]\ndot_retries = 9\n").unwrap();
        assert_eq!(cfg.lock.dot_retries, 9);
        assert_eq!(cfg.lock.stale_lock_secs, LockConfig::default().stale_lock_secs);
        assert_eq!(cfg.general.log_level, "warn");
    }
}
