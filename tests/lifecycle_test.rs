//! Lifecycle controller tests against an in-memory session backend:
//! idempotent start/stop, zombie recovery, and persist-before-launch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use townd::agents::lifecycle::{AgentManager, AgentSpec, LifecycleError};
use townd::agents::state::{AgentRunState, RunState, StateStore};
use townd::tmux::{SessionControl, TmuxError};

/// A pane PID far outside any real PID range, so subtree searches against
/// the live process table can never accidentally match.
const FAKE_PANE_PID: u32 = 4_000_000_000;

#[derive(Default)]
struct MockState {
    /// session name -> foreground command
    sessions: HashMap<String, String>,
    created: usize,
    killed: Vec<String>,
    sent_keys: Vec<(String, String)>,
    env: Vec<(String, String, String)>,
    options: Vec<(String, String, String)>,
    fail_set_environment: bool,
    fail_send_keys: bool,
}

/// In-memory stand-in for tmux.
#[derive(Default)]
struct MockSessions {
    state: Mutex<MockState>,
}

impl MockSessions {
    fn with_session(self, name: &str, foreground: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(name.to_string(), foreground.to_string());
        self
    }

    fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    fn killed(&self) -> Vec<String> {
        self.state.lock().unwrap().killed.clone()
    }

    fn sent_keys(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sent_keys.clone()
    }
}

#[async_trait]
impl SessionControl for MockSessions {
    async fn list_sessions(&self) -> Result<Vec<String>, TmuxError> {
        Ok(self.state.lock().unwrap().sessions.keys().cloned().collect())
    }

    async fn has_session(&self, session: &str) -> Result<bool, TmuxError> {
        Ok(self.state.lock().unwrap().sessions.contains_key(session))
    }

    async fn new_session(&self, session: &str, _workdir: Option<&Path>) -> Result<(), TmuxError> {
        let mut state = self.state.lock().unwrap();
        if state.sessions.contains_key(session) {
            return Err(TmuxError::SessionExists(session.to_string()));
        }
        state.sessions.insert(session.to_string(), "zsh".to_string());
        state.created += 1;
        Ok(())
    }

    async fn new_session_with_command(
        &self,
        session: &str,
        workdir: Option<&Path>,
        _command: &str,
    ) -> Result<(), TmuxError> {
        self.new_session(session, workdir).await
    }

    async fn kill_session(&self, session: &str) -> Result<(), TmuxError> {
        let mut state = self.state.lock().unwrap();
        state.killed.push(session.to_string());
        if state.sessions.remove(session).is_none() {
            return Err(TmuxError::SessionNotFound(session.to_string()));
        }
        Ok(())
    }

    async fn send_keys(&self, session: &str, text: &str) -> Result<(), TmuxError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_send_keys {
            return Err(TmuxError::CommandFailed {
                args: vec!["send-keys".into()],
                stderr: "injected failure".into(),
            });
        }
        if !state.sessions.contains_key(session) {
            return Err(TmuxError::SessionNotFound(session.to_string()));
        }
        state.sent_keys.push((session.to_string(), text.to_string()));
        // Typing the launch command puts the workload in the foreground.
        state
            .sessions
            .insert(session.to_string(), "claude".to_string());
        Ok(())
    }

    async fn set_environment(
        &self,
        session: &str,
        key: &str,
        value: &str,
    ) -> Result<(), TmuxError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_set_environment {
            return Err(TmuxError::CommandFailed {
                args: vec!["set-environment".into()],
                stderr: "injected failure".into(),
            });
        }
        state
            .env
            .push((session.to_string(), key.to_string(), value.to_string()));
        Ok(())
    }

    async fn set_option(
        &self,
        session: &str,
        option: &str,
        value: &str,
    ) -> Result<(), TmuxError> {
        self.state.lock().unwrap().options.push((
            session.to_string(),
            option.to_string(),
            value.to_string(),
        ));
        Ok(())
    }

    async fn pane_command(&self, session: &str) -> Result<String, TmuxError> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(session)
            .cloned()
            .ok_or_else(|| TmuxError::SessionNotFound(session.to_string()))
    }

    async fn pane_pid(&self, session: &str) -> Result<u32, TmuxError> {
        if self.state.lock().unwrap().sessions.contains_key(session) {
            Ok(FAKE_PANE_PID)
        } else {
            Err(TmuxError::SessionNotFound(session.to_string()))
        }
    }

    async fn wait_for_command(
        &self,
        session: &str,
        excluded: &[&str],
        _timeout: Duration,
    ) -> Result<(), TmuxError> {
        let cmd = self.pane_command(session).await?;
        if excluded.contains(&cmd.as_str()) {
            return Err(TmuxError::Timeout(session.to_string()));
        }
        Ok(())
    }

    async fn wait_until_ready(&self, session: &str, _timeout: Duration) -> Result<(), TmuxError> {
        self.pane_command(session).await.map(|_| ())
    }
}

fn spec(work_dir: PathBuf) -> AgentSpec {
    AgentSpec {
        agent_id: "gastown/witness".to_string(),
        session: "gt-gastown-witness".to_string(),
        rig: Some("gastown".to_string()),
        role: "witness".to_string(),
        town_root: work_dir.clone(),
        work_dir,
        launch_command: "claude --dangerously-skip-permissions".to_string(),
        startup_nudge: None,
    }
}

fn manager(dir: &TempDir, mock: Arc<MockSessions>) -> (AgentManager, StateStore) {
    let store = StateStore::new(dir.path(), "witness.json");
    let mgr = AgentManager::new(mock, store.clone(), spec(dir.path().to_path_buf()));
    (mgr, StateStore::new(dir.path(), "witness.json"))
}

#[tokio::test]
async fn start_creates_session_and_persists_running() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, store) = manager(&dir, mock.clone());

    let report = mgr.start().await.unwrap();
    assert!(report.diagnostics.is_empty());
    assert_eq!(mock.created(), 1);

    let record = store.load().unwrap();
    assert_eq!(record.state, RunState::Running);
    assert!(record.started_at.is_some());
    assert_eq!(record.pid, 0);

    let keys = mock.sent_keys();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].1, "claude --dangerously-skip-permissions");

    // Status-line theming was applied to the new session.
    let options = mock.state.lock().unwrap().options.clone();
    assert!(options
        .iter()
        .any(|(s, opt, _)| s == "gt-gastown-witness" && opt == "status-style"));
}

#[tokio::test]
async fn second_start_is_already_running() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, _) = manager(&dir, mock.clone());

    mgr.start().await.unwrap();
    let err = mgr.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyRunning));
    // No duplicate session was created.
    assert_eq!(mock.created(), 1);
}

#[tokio::test]
async fn zombie_session_is_torn_down_before_start() {
    let dir = TempDir::new().unwrap();
    // Session exists but a bare shell occupies the foreground slot.
    let mock = Arc::new(MockSessions::default().with_session("gt-gastown-witness", "bash"));
    let (mgr, store) = manager(&dir, mock.clone());

    // A zombie never surfaces a "session exists" conflict.
    mgr.start().await.unwrap();

    assert_eq!(mock.killed(), vec!["gt-gastown-witness"]);
    assert_eq!(mock.created(), 1);
    assert_eq!(store.load().unwrap().state, RunState::Running);
}

#[tokio::test]
async fn persisted_running_with_dead_session_does_not_block_start() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, store) = manager(&dir, mock.clone());

    // Stale belief: the file says Running but nothing is alive.
    store
        .save(&AgentRunState {
            state: RunState::Running,
            started_at: Some(chrono::Utc::now()),
            pid: 0,
            monitored: Vec::new(),
        })
        .unwrap();

    mgr.start().await.unwrap();
    assert_eq!(mock.created(), 1);
}

#[tokio::test]
async fn live_legacy_pid_blocks_start() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, store) = manager(&dir, mock.clone());

    // Legacy direct-process agent: the tracked PID is this test process,
    // which is definitely alive.
    store
        .save(&AgentRunState {
            state: RunState::Running,
            started_at: Some(chrono::Utc::now()),
            pid: std::process::id(),
            monitored: Vec::new(),
        })
        .unwrap();

    let err = mgr.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyRunning));
    assert_eq!(mock.created(), 0);
}

#[tokio::test]
async fn launch_failure_after_state_write_keeps_running_record() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    mock.state.lock().unwrap().fail_send_keys = true;
    let (mgr, store) = manager(&dir, mock.clone());

    let err = mgr.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Session(_)));

    // The session was torn down best-effort...
    assert_eq!(mock.killed(), vec!["gt-gastown-witness"]);
    // ...but the Running record survives so the crash is recoverable.
    assert_eq!(store.load().unwrap().state, RunState::Running);
}

#[tokio::test]
async fn environment_failure_is_nonfatal() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    mock.state.lock().unwrap().fail_set_environment = true;
    let (mgr, store) = manager(&dir, mock.clone());

    let report = mgr.start().await.unwrap();
    assert!(!report.diagnostics.is_empty());
    assert_eq!(store.load().unwrap().state, RunState::Running);
}

#[tokio::test]
async fn stop_on_stopped_agent_is_not_running() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, _) = manager(&dir, mock);

    let err = mgr.stop().await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotRunning));
}

#[tokio::test]
async fn stop_kills_session_and_persists_stopped() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, store) = manager(&dir, mock.clone());

    mgr.start().await.unwrap();
    mgr.stop().await.unwrap();

    assert!(!mock
        .state
        .lock()
        .unwrap()
        .sessions
        .contains_key("gt-gastown-witness"));
    let record = store.load().unwrap();
    assert_eq!(record.state, RunState::Stopped);
    assert_eq!(record.pid, 0);
}

#[tokio::test]
async fn stop_with_live_session_but_stopped_record_succeeds() {
    let dir = TempDir::new().unwrap();
    // Observation over memory: the file says Stopped, the session is live.
    let mock = Arc::new(MockSessions::default().with_session("gt-gastown-witness", "claude"));
    let (mgr, store) = manager(&dir, mock.clone());

    mgr.stop().await.unwrap();
    assert_eq!(mock.killed(), vec!["gt-gastown-witness"]);
    assert_eq!(store.load().unwrap().state, RunState::Stopped);
}

#[tokio::test]
async fn status_merges_monitored_without_writing() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, store) = manager(&dir, mock);

    mgr.start().await.unwrap();
    let monitored = vec!["nux".to_string(), "slit".to_string()];
    let status = mgr.status(&monitored).await.unwrap();
    assert_eq!(status.monitored, monitored);

    // Observation never mutates persisted state.
    assert!(store.load().unwrap().monitored.is_empty());
}

#[tokio::test]
async fn restart_tolerates_not_running() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, store) = manager(&dir, mock.clone());

    mgr.restart().await.unwrap();
    assert_eq!(mock.created(), 1);
    assert_eq!(store.load().unwrap().state, RunState::Running);
}

#[tokio::test]
async fn restart_replaces_a_running_session() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, _) = manager(&dir, mock.clone());

    mgr.start().await.unwrap();
    mgr.restart().await.unwrap();

    assert_eq!(mock.created(), 2);
    assert_eq!(mock.killed(), vec!["gt-gastown-witness"]);
}

#[tokio::test]
async fn supervisor_sweep_feeds_health_into_backoff() {
    use townd::scheduler::backoff::{BackoffConfig, BackoffRegistry, BackoffStrategy};
    use townd::supervisor;

    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, _) = manager(&dir, mock.clone());
    let mgr = Arc::new(mgr);

    let registry = Arc::new(tokio::sync::RwLock::new(BackoffRegistry::new(
        BackoffConfig {
            strategy: BackoffStrategy::Exponential,
            base_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(600),
            factor: 1.5,
        },
    )));

    // Agent down: the sweep records a miss and backs off.
    supervisor::sweep_once(&registry, std::slice::from_ref(&mgr)).await;
    assert_eq!(
        registry.write().await.interval_for("gastown/witness"),
        Duration::from_secs(120)
    );

    // Backed off: the next sweep skips the agent entirely.
    supervisor::sweep_once(&registry, std::slice::from_ref(&mgr)).await;
    assert_eq!(
        registry.write().await.interval_for("gastown/witness"),
        Duration::from_secs(120)
    );
}

#[tokio::test]
async fn is_healthy_tracks_live_workload() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockSessions::default());
    let (mgr, _) = manager(&dir, mock.clone());

    assert!(!mgr.is_healthy().await);
    mgr.start().await.unwrap();
    assert!(mgr.is_healthy().await);

    // Workload dies, shell takes the foreground back: zombie.
    mock.state
        .lock()
        .unwrap()
        .sessions
        .insert("gt-gastown-witness".to_string(), "bash".to_string());
    assert!(!mgr.is_healthy().await);
}
