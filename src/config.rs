//! Daemon configuration — `config.toml` in the town root, all fields optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scheduler::backoff::{BackoffConfig, BackoffStrategy};

const DEFAULT_POLL_TICK_SECS: u64 = 10;
const DEFAULT_BASE_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_INTERVAL_SECS: u64 = 600;
const DEFAULT_FACTOR: f64 = 1.5;

// ─── BackoffSection ──────────────────────────────────────────────────────────

/// Poll-backoff tuning (`[backoff]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffSection {
    /// Growth strategy: "fixed", "geometric", or "exponential".
    pub strategy: BackoffStrategy,
    /// Starting poll interval in seconds (default: 60).
    pub base_interval_secs: u64,
    /// Interval cap in seconds (default: 600).
    pub max_interval_secs: u64,
    /// Multiplier for the geometric strategy (default: 1.5).
    pub factor: f64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Geometric,
            base_interval_secs: DEFAULT_BASE_INTERVAL_SECS,
            max_interval_secs: DEFAULT_MAX_INTERVAL_SECS,
            factor: DEFAULT_FACTOR,
        }
    }
}

impl BackoffSection {
    pub fn to_backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            strategy: self.strategy,
            base_interval: Duration::from_secs(self.base_interval_secs),
            max_interval: Duration::from_secs(self.max_interval_secs),
            factor: self.factor,
        }
    }
}

// ─── DaemonConfig ────────────────────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// Town root directory. Discovered from the working directory when unset.
    pub town_root: Option<PathBuf>,
    /// Seconds between supervisor sweeps (default: 10).
    pub poll_tick_secs: Option<u64>,
    /// Launch command sent into a fresh agent session.
    /// Default: `claude --dangerously-skip-permissions`.
    pub agent_command: Option<String>,
    /// Log format: "compact" (default) or "json".
    pub log_format: Option<String>,
    pub backoff: BackoffSection,
}

impl DaemonConfig {
    /// Load `config.toml` from the town root. Missing file = defaults;
    /// a malformed file is reported and ignored rather than fatal.
    pub fn load(town_root: &Path) -> Self {
        let path = town_root.join("config.toml");
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed config.toml");
                Self::default()
            }
        }
    }

    pub fn poll_tick(&self) -> Duration {
        Duration::from_secs(self.poll_tick_secs.unwrap_or(DEFAULT_POLL_TICK_SECS))
    }

    pub fn agent_command(&self) -> &str {
        self.agent_command
            .as_deref()
            .unwrap_or("claude --dangerously-skip-permissions")
    }
}
