//! Per-agent adaptive polling backoff.
//!
//! Healthy agents get polled at the base interval; agents that repeatedly
//! miss get polled less and less often, up to a cap. The only path that
//! shrinks an interval is confirmed activity, which resets it straight back
//! to the base; there is no gradual decay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

// ── Config ───────────────────────────────────────────────────────────────────

/// How intervals grow after a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Keep the same interval (no backoff).
    Fixed,
    /// Multiply by `factor` each miss (default 1.5x).
    Geometric,
    /// Double the interval each miss.
    Exponential,
}

/// Backoff configuration, supplied once at registry construction.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub strategy: BackoffStrategy,
    /// Starting interval for every agent.
    pub base_interval: Duration,
    /// Cap on how large intervals can grow.
    pub max_interval: Duration,
    /// Multiplier for the geometric strategy.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Geometric,
            base_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(600),
            factor: 1.5,
        }
    }
}

// ── Per-agent state ──────────────────────────────────────────────────────────

/// Backoff state for a single agent.
#[derive(Debug, Clone)]
pub struct AgentBackoff {
    /// Agent identifier, e.g. `"mayor"` or `"gastown/witness"`.
    pub agent_id: String,
    pub base_interval: Duration,
    /// Current (possibly backed-off) interval.
    pub current_interval: Duration,
    pub max_interval: Duration,
    /// Consecutive pokes with no observed response.
    pub consecutive_miss: u32,
    /// When we last poked this agent. `None` = never.
    pub last_poke: Option<Instant>,
    /// When the agent last showed activity. `None` = never.
    pub last_activity: Option<Instant>,
}

impl AgentBackoff {
    pub fn new(agent_id: impl Into<String>, config: &BackoffConfig) -> Self {
        Self {
            agent_id: agent_id.into(),
            base_interval: config.base_interval,
            current_interval: config.base_interval,
            max_interval: config.max_interval,
            consecutive_miss: 0,
            last_poke: None,
            last_activity: None,
        }
    }

    /// True if enough time has passed since the last poke (or we never poked).
    pub fn should_poll(&self) -> bool {
        match self.last_poke {
            None => true,
            Some(at) => at.elapsed() >= self.current_interval,
        }
    }

    /// Record that we poked the agent. Does not change the interval.
    pub fn record_poke(&mut self) {
        self.last_poke = Some(Instant::now());
    }

    /// Record that the agent didn't respond since the last poke.
    /// Grows the interval per strategy, clamped to `max_interval`.
    pub fn record_miss(&mut self, config: &BackoffConfig) {
        self.consecutive_miss += 1;

        match config.strategy {
            BackoffStrategy::Fixed => {}
            BackoffStrategy::Geometric => {
                self.current_interval =
                    Duration::from_secs_f64(self.current_interval.as_secs_f64() * config.factor);
            }
            BackoffStrategy::Exponential => {
                self.current_interval = self.current_interval.saturating_mul(2);
            }
        }

        if self.current_interval > self.max_interval {
            self.current_interval = self.max_interval;
        }
    }

    /// Record confirmed activity: reset the interval to base.
    pub fn record_activity(&mut self) {
        self.consecutive_miss = 0;
        self.current_interval = self.base_interval;
        self.last_activity = Some(Instant::now());
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Backoff state for all agents, keyed by agent ID.
///
/// Entries are created lazily on first reference; absence of prior state is
/// itself meaningful ("never polled", hence poll now). No operation fails.
pub struct BackoffRegistry {
    config: BackoffConfig,
    agents: HashMap<String, AgentBackoff>,
}

impl BackoffRegistry {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            agents: HashMap::new(),
        }
    }

    fn get_or_create(&mut self, agent_id: &str) -> &mut AgentBackoff {
        let config = &self.config;
        self.agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentBackoff::new(agent_id, config))
    }

    /// True if we should poke the given agent now.
    pub fn should_poll(&mut self, agent_id: &str) -> bool {
        self.get_or_create(agent_id).should_poll()
    }

    pub fn record_poke(&mut self, agent_id: &str) {
        self.get_or_create(agent_id).record_poke();
    }

    pub fn record_miss(&mut self, agent_id: &str) {
        let config = self.config.clone();
        self.get_or_create(agent_id).record_miss(&config);
    }

    pub fn record_activity(&mut self, agent_id: &str) {
        self.get_or_create(agent_id).record_activity();
    }

    /// Current interval for an agent.
    pub fn interval_for(&mut self, agent_id: &str) -> Duration {
        self.get_or_create(agent_id).current_interval
    }

    /// Map of agent ID to current interval, for logging.
    pub fn snapshot_all(&self) -> HashMap<String, Duration> {
        self.agents
            .iter()
            .map(|(id, ab)| (id.clone(), ab.current_interval))
            .collect()
    }
}

/// Thread-safe shared registry, one per process, passed into the
/// supervising loop.
pub type SharedBackoffRegistry = Arc<RwLock<BackoffRegistry>>;
