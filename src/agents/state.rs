//! Persisted per-agent run state.
//!
//! One JSON file per agent, the single source of truth across process
//! restarts. Saves go through a temp file in the same directory plus an
//! atomic rename, so a crash mid-write never corrupts the last good record.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("reading state file: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoding state file: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("replacing state file: {0}")]
    Replace(#[from] tempfile::PersistError),
}

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Stopped,
    Running,
}

/// Persisted run record. Invariant: `state == Running` implies
/// `started_at.is_some()` — enforced by the lifecycle controller, which is
/// the only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunState {
    pub state: RunState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Controlling OS process, 0 when the workload lives inside a session
    /// rather than as a directly held child.
    #[serde(default)]
    pub pid: u32,
    /// Sub-workers this agent is monitoring (display/merge data only).
    #[serde(default)]
    pub monitored: Vec<String>,
}

impl Default for AgentRunState {
    fn default() -> Self {
        Self {
            state: RunState::Stopped,
            started_at: None,
            pid: 0,
            monitored: Vec::new(),
        }
    }
}

/// Loads and atomically saves one agent's run record.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(dir: &Path, file_name: &str) -> Self {
        Self {
            path: dir.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, defaulting to Stopped when the file does not exist
    /// yet. A corrupt file is an error — never silently reset.
    pub fn load(&self) -> Result<AgentRunState, StateError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AgentRunState::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the record: write a temp file in the same
    /// directory, then rename over the canonical path.
    pub fn save(&self, record: &AgentRunState) -> Result<(), StateError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, record)?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}
