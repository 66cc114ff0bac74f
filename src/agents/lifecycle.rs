//! Per-agent lifecycle: start, stop, status, restart.
//!
//! The controller reconciles persisted belief against live observation and
//! trusts observation: a healthy live session means AlreadyRunning no matter
//! what the file says, and a zombie session never blocks a fresh start.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::agents::health;
use crate::agents::state::{AgentRunState, RunState, StateError, StateStore};
use crate::procs;
use crate::tmux::{SessionControl, TmuxError};

/// How long to wait for a fresh pane's shell before typing into it.
const READY_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait for the launched workload to displace the shell.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Expected condition, not a failure: the agent is genuinely running.
    #[error("agent already running")]
    AlreadyRunning,
    /// Expected condition, not a failure: nothing to stop.
    #[error("agent not running")]
    NotRunning,
    #[error("session operation failed: {0}")]
    Session(#[from] TmuxError),
    #[error("state persistence failed: {0}")]
    State(#[from] StateError),
}

/// Static description of one supervised agent.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Stable identifier, e.g. `"mayor"` or `"gastown/witness"`.
    pub agent_id: String,
    /// tmux session hosting the agent.
    pub session: String,
    pub rig: Option<String>,
    pub role: String,
    pub work_dir: PathBuf,
    pub town_root: PathBuf,
    /// Command typed into the fresh session to launch the workload.
    pub launch_command: String,
    /// Optional first prompt delivered once the workload is up.
    pub startup_nudge: Option<String>,
}

/// Successful-start report. Best-effort steps that failed are listed here
/// instead of aborting the start.
#[derive(Debug, Default)]
pub struct StartReport {
    pub diagnostics: Vec<String>,
}

/// Drives one agent's state machine against a session backend.
pub struct AgentManager {
    sessions: Arc<dyn SessionControl>,
    store: StateStore,
    spec: AgentSpec,
}

impl AgentManager {
    pub fn new(sessions: Arc<dyn SessionControl>, store: StateStore, spec: AgentSpec) -> Self {
        Self {
            sessions,
            store,
            spec,
        }
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    /// Start the agent.
    ///
    /// Zombie sessions (container alive, workload dead) are torn down before
    /// the fresh start. Running state is persisted *before* the workload
    /// launch so a crash mid-launch leaves a recoverable Running record
    /// instead of silently reverting to Stopped.
    pub async fn start(&self) -> Result<StartReport, LifecycleError> {
        let mut record = self.store.load()?;
        let session = &self.spec.session;
        let mut report = StartReport::default();

        if self.sessions.has_session(session).await.unwrap_or(false) {
            if health::is_workload_running(self.sessions.as_ref(), session).await {
                return Err(LifecycleError::AlreadyRunning);
            }
            // Zombie: tmux alive, workload dead. Kill and recreate.
            info!(agent_id = %self.spec.agent_id, session = %session, "tearing down zombie session");
            self.sessions.kill_session(session).await?;
        }

        // Legacy direct-process agents tracked by PID.
        if record.state == RunState::Running && record.pid > 0 && procs::process_exists(record.pid)
        {
            return Err(LifecycleError::AlreadyRunning);
        }

        self.sessions
            .new_session(session, Some(&self.spec.work_dir))
            .await?;

        // Environment propagation is best-effort: the session works without it.
        for (key, value) in self.session_env() {
            if let Err(e) = self.sessions.set_environment(session, &key, &value).await {
                report.diagnostics.push(format!("set-environment {key}: {e}"));
            }
        }

        // Theming is cosmetic and never blocks the start.
        let theme = crate::tmux::assign_theme(self.spec.rig.as_deref().unwrap_or("town"));
        if let Err(e) = self
            .sessions
            .set_option(session, "status-style", &format!("bg={theme},fg=colour255"))
            .await
        {
            report.diagnostics.push(format!("status-style: {e}"));
        }

        record.state = RunState::Running;
        record.started_at = Some(Utc::now());
        record.pid = 0; // workload lives inside the session, no held child
        if let Err(e) = self.store.save(&record) {
            // The state write is the point of no return; without it a crash
            // would leave an untracked session behind.
            let _ = self.sessions.kill_session(session).await;
            return Err(e.into());
        }

        if let Err(e) = self
            .sessions
            .wait_until_ready(session, READY_TIMEOUT)
            .await
        {
            report.diagnostics.push(format!("shell readiness: {e}"));
        }

        if let Err(e) = self
            .sessions
            .send_keys(session, &self.spec.launch_command)
            .await
        {
            let _ = self.sessions.kill_session(session).await;
            return Err(e.into());
        }

        if let Err(e) = self
            .sessions
            .wait_for_command(session, health::SHELLS, LAUNCH_TIMEOUT)
            .await
        {
            report.diagnostics.push(format!("workload startup: {e}"));
        }

        if let Some(nudge) = &self.spec.startup_nudge {
            if let Err(e) = self.sessions.send_keys(session, nudge).await {
                report.diagnostics.push(format!("startup nudge: {e}"));
            }
        }

        info!(agent_id = %self.spec.agent_id, session = %session, "agent started");
        for diag in &report.diagnostics {
            warn!(agent_id = %self.spec.agent_id, "non-fatal start step failed: {diag}");
        }
        Ok(report)
    }

    /// Stop the agent. The overriding goal is reaching Stopped state, so the
    /// session kill and the PID interrupt are both best-effort.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let mut record = self.store.load()?;
        let session = &self.spec.session;

        let session_live = self.sessions.has_session(session).await.unwrap_or(false);
        if record.state != RunState::Running && !session_live {
            return Err(LifecycleError::NotRunning);
        }

        if session_live {
            if let Err(e) = self.sessions.kill_session(session).await {
                warn!(agent_id = %self.spec.agent_id, error = %e, "session kill failed; continuing to Stopped");
            }
        }

        // Graceful interrupt for a trackable controlling process that isn't us.
        if record.pid > 0 && record.pid != std::process::id() && procs::process_exists(record.pid)
        {
            let _ = procs::send_interrupt(record.pid);
        }

        record.state = RunState::Stopped;
        record.pid = 0;
        self.store.save(&record)?;

        info!(agent_id = %self.spec.agent_id, session = %session, "agent stopped");
        Ok(())
    }

    /// Current status: the persisted record merged with the externally
    /// supplied live sub-worker set. Pure read — never writes back.
    pub async fn status(&self, monitored: &[String]) -> Result<AgentRunState, LifecycleError> {
        let mut record = self.store.load()?;
        record.monitored = monitored.to_vec();
        Ok(record)
    }

    /// Live health probe: the session exists and the workload genuinely
    /// occupies it. Total function — probe failures read as unhealthy.
    pub async fn is_healthy(&self) -> bool {
        if !self
            .sessions
            .has_session(&self.spec.session)
            .await
            .unwrap_or(false)
        {
            return false;
        }
        health::is_workload_running(self.sessions.as_ref(), &self.spec.session).await
    }

    /// Stop (tolerating NotRunning) followed by a fresh start.
    pub async fn restart(&self) -> Result<StartReport, LifecycleError> {
        match self.stop().await {
            Ok(()) | Err(LifecycleError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        self.start().await
    }

    fn session_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("GT_ROLE".to_string(), self.spec.role.clone()),
            (
                "GT_TOWN_ROOT".to_string(),
                self.spec.town_root.display().to_string(),
            ),
        ];
        if let Some(rig) = &self.spec.rig {
            env.push(("GT_RIG".to_string(), rig.clone()));
        }
        env
    }
}
