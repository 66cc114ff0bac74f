//! tmux command wrapper — the only place that shells out to tmux.
//!
//! Every operation is a fresh `tmux` invocation; nothing is cached. Errors
//! are classified from stderr into typed variants so callers can branch on
//! "no server" / "duplicate session" / "not found" instead of string-matching.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// How often readiness waits re-poll the pane.
const POLL_STEP: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("no tmux server running")]
    NoServer,
    #[error("session already exists: {0}")]
    SessionExists(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("timed out waiting for session {0}")]
    Timeout(String),
    #[error("tmux {args:?} failed: {stderr}")]
    CommandFailed { args: Vec<String>, stderr: String },
    #[error("spawning tmux: {0}")]
    Io(#[from] std::io::Error),
}

/// Classify a failed tmux invocation by its stderr.
fn classify_stderr(stderr: &str, args: &[String]) -> TmuxError {
    let target = args
        .iter()
        .position(|a| a == "-t" || a == "-s")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_default();

    if stderr.contains("no server running") || stderr.contains("error connecting to") {
        TmuxError::NoServer
    } else if stderr.contains("duplicate session") {
        TmuxError::SessionExists(target)
    } else if stderr.contains("session not found")
        || stderr.contains("can't find session")
        || stderr.contains("can't find pane")
    {
        TmuxError::SessionNotFound(target)
    } else {
        TmuxError::CommandFailed {
            args: args.to_vec(),
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Status-line colours cycled by rig name so each rig's sessions are
/// visually distinct in the multiplexer.
const THEME_COLOURS: &[&str] = &[
    "colour25", "colour28", "colour94", "colour90", "colour130", "colour23",
];

/// Deterministic status-line colour for a rig (or the town itself).
pub fn assign_theme(rig: &str) -> &'static str {
    let sum: usize = rig.bytes().map(usize::from).sum();
    THEME_COLOURS[sum % THEME_COLOURS.len()]
}

/// Abstract session-container operations consumed by the lifecycle controller
/// and health classifier. `Tmux` is the real implementation; tests supply
/// in-memory fakes.
#[async_trait]
pub trait SessionControl: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<String>, TmuxError>;
    async fn has_session(&self, session: &str) -> Result<bool, TmuxError>;
    async fn new_session(&self, session: &str, workdir: Option<&Path>) -> Result<(), TmuxError>;
    async fn new_session_with_command(
        &self,
        session: &str,
        workdir: Option<&Path>,
        command: &str,
    ) -> Result<(), TmuxError>;
    async fn kill_session(&self, session: &str) -> Result<(), TmuxError>;
    /// Type `text` into the session's active pane, followed by Enter.
    async fn send_keys(&self, session: &str, text: &str) -> Result<(), TmuxError>;
    async fn set_environment(&self, session: &str, key: &str, value: &str)
        -> Result<(), TmuxError>;
    /// Set a session option (status-line theming). Cosmetic only.
    async fn set_option(&self, session: &str, option: &str, value: &str)
        -> Result<(), TmuxError>;
    /// Command name currently occupying the pane's foreground slot.
    async fn pane_command(&self, session: &str) -> Result<String, TmuxError>;
    /// PID of the pane's root process.
    async fn pane_pid(&self, session: &str) -> Result<u32, TmuxError>;
    /// Wait until the foreground command is not one of `excluded` (typically
    /// the shell set). Times out non-fatally for callers that tolerate it.
    async fn wait_for_command(
        &self,
        session: &str,
        excluded: &[&str],
        timeout: Duration,
    ) -> Result<(), TmuxError>;
    /// Wait until the pane exists and reports a foreground command at all.
    async fn wait_until_ready(&self, session: &str, timeout: Duration) -> Result<(), TmuxError>;
}

/// Real tmux backend.
#[derive(Debug, Clone, Default)]
pub struct Tmux {
    /// Override for the tmux binary (tests, unusual installs).
    binary: Option<PathBuf>,
}

impl Tmux {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let bin = self
            .binary
            .as_deref()
            .unwrap_or_else(|| Path::new("tmux"));
        let output = Command::new(bin).args(args).output().await?;
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            debug!(args = ?owned, stderr = %stderr.trim(), "tmux command failed");
            Err(classify_stderr(&stderr, &owned))
        }
    }

    /// PIDs of every pane root in `session`. Used to build the trusted
    /// ancestry set during orphan detection.
    pub async fn pane_pids(&self, session: &str) -> Result<Vec<u32>, TmuxError> {
        let out = self
            .run(&["list-panes", "-t", session, "-F", "#{pane_pid}"])
            .await?;
        Ok(out.lines().filter_map(|l| l.trim().parse().ok()).collect())
    }
}

#[async_trait]
impl SessionControl for Tmux {
    async fn list_sessions(&self) -> Result<Vec<String>, TmuxError> {
        match self.run(&["list-sessions", "-F", "#{session_name}"]).await {
            Ok(out) => Ok(out
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()),
            // No server means no sessions, not a failure.
            Err(TmuxError::NoServer) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn has_session(&self, session: &str) -> Result<bool, TmuxError> {
        match self.run(&["has-session", "-t", session]).await {
            Ok(_) => Ok(true),
            Err(TmuxError::NoServer | TmuxError::SessionNotFound(_)) => Ok(false),
            Err(TmuxError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn new_session(&self, session: &str, workdir: Option<&Path>) -> Result<(), TmuxError> {
        let dir = workdir.map(|wd| wd.display().to_string());
        let mut args = vec!["new-session", "-d", "-s", session];
        if let Some(dir) = dir.as_deref() {
            args.push("-c");
            args.push(dir);
        }
        self.run(&args).await.map(|_| ())
    }

    async fn new_session_with_command(
        &self,
        session: &str,
        workdir: Option<&Path>,
        command: &str,
    ) -> Result<(), TmuxError> {
        let dir = workdir.map(|wd| wd.display().to_string());
        let mut args = vec!["new-session", "-d", "-s", session];
        if let Some(dir) = dir.as_deref() {
            args.push("-c");
            args.push(dir);
        }
        args.push(command);
        self.run(&args).await.map(|_| ())
    }

    async fn kill_session(&self, session: &str) -> Result<(), TmuxError> {
        self.run(&["kill-session", "-t", session]).await.map(|_| ())
    }

    async fn send_keys(&self, session: &str, text: &str) -> Result<(), TmuxError> {
        // Literal text first, Enter as a separate key so tmux never
        // interprets the payload.
        self.run(&["send-keys", "-t", session, "-l", text]).await?;
        self.run(&["send-keys", "-t", session, "Enter"]).await.map(|_| ())
    }

    async fn set_environment(
        &self,
        session: &str,
        key: &str,
        value: &str,
    ) -> Result<(), TmuxError> {
        self.run(&["set-environment", "-t", session, key, value])
            .await
            .map(|_| ())
    }

    async fn set_option(
        &self,
        session: &str,
        option: &str,
        value: &str,
    ) -> Result<(), TmuxError> {
        self.run(&["set-option", "-t", session, option, value])
            .await
            .map(|_| ())
    }

    async fn pane_command(&self, session: &str) -> Result<String, TmuxError> {
        let out = self
            .run(&[
                "display-message",
                "-p",
                "-t",
                session,
                "#{pane_current_command}",
            ])
            .await?;
        Ok(out.trim().to_string())
    }

    async fn pane_pid(&self, session: &str) -> Result<u32, TmuxError> {
        let out = self
            .run(&["display-message", "-p", "-t", session, "#{pane_pid}"])
            .await?;
        out.trim().parse().map_err(|_| TmuxError::CommandFailed {
            args: vec!["display-message".into(), session.into()],
            stderr: format!("unparseable pane_pid: {:?}", out.trim()),
        })
    }

    async fn wait_for_command(
        &self,
        session: &str,
        excluded: &[&str],
        timeout: Duration,
    ) -> Result<(), TmuxError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(cmd) = self.pane_command(session).await {
                if !cmd.is_empty() && !excluded.contains(&cmd.as_str()) {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(TmuxError::Timeout(session.to_string()));
            }
            tokio::time::sleep(POLL_STEP).await;
        }
    }

    async fn wait_until_ready(&self, session: &str, timeout: Duration) -> Result<(), TmuxError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(cmd) = self.pane_command(session).await {
                if !cmd.is_empty() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(TmuxError::Timeout(session.to_string()));
            }
            tokio::time::sleep(POLL_STEP).await;
        }
    }
}
