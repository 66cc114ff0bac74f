//! Orphan detection: sessions without a known logical owner, and workload
//! processes with no trusted tmux ancestry.
//!
//! Both detectors re-derive ground truth on every run. Remediation is
//! best-effort over the full finding list; the last failure is surfaced.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::agents::names;
use crate::doctor::CheckResult;
use crate::procs::{self, ProcessRecord};
use crate::tmux::{SessionControl, Tmux};
use crate::workspace;

/// Case-insensitive match for agent workload processes.
static WORKLOAD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("(?i)claude").unwrap_or_else(|e| panic!("workload regex: {e}")));

// ── Session orphans ──────────────────────────────────────────────────────────

/// Split a raw session list into valid sessions and orphans. Sessions
/// outside the `gt-` naming domain are ignored entirely.
pub fn classify_sessions(
    sessions: &[String],
    valid_rigs: &HashSet<String>,
) -> (usize, Vec<String>) {
    let mut valid = 0;
    let mut orphans = Vec::new();

    for session in sessions {
        if session.is_empty() || !session.starts_with(names::SESSION_PREFIX) {
            continue;
        }
        if names::is_valid_session(session, valid_rigs) {
            valid += 1;
        } else {
            orphans.push(session.clone());
        }
    }

    (valid, orphans)
}

/// Detects tmux sessions in the `gt-` domain whose rig no longer exists.
pub struct OrphanSessionCheck {
    /// Findings cached by `run` for `fix`.
    orphans: Vec<String>,
}

impl OrphanSessionCheck {
    pub fn new() -> Self {
        Self {
            orphans: Vec::new(),
        }
    }

    pub fn orphans(&self) -> &[String] {
        &self.orphans
    }

    pub async fn run(&mut self, tmux: &Tmux, town_root: &Path) -> CheckResult {
        const NAME: &str = "orphan-sessions";

        let sessions = match tmux.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                let mut result = CheckResult::warning(NAME, "could not list tmux sessions");
                result.details.push(e.to_string());
                return result;
            }
        };
        if sessions.is_empty() {
            return CheckResult::ok(NAME, "no tmux sessions found");
        }

        let valid_rigs = workspace::valid_rig_names(town_root);
        let (valid, orphans) = classify_sessions(&sessions, &valid_rigs);
        self.orphans = orphans;

        if self.orphans.is_empty() {
            return CheckResult::ok(NAME, format!("all {valid} town sessions are valid"));
        }

        let mut result = CheckResult::warning(
            NAME,
            format!("found {} orphaned session(s)", self.orphans.len()),
        );
        result.details = self
            .orphans
            .iter()
            .map(|s| format!("orphan: {s}"))
            .collect();
        result.fix_hint = Some("run 'townd doctor --fix' to kill orphaned sessions".to_string());
        result
    }

    /// Kill every flagged session. Continues through the full list; the last
    /// failure is surfaced. Returns `None` when there was nothing to fix.
    pub async fn fix(&mut self, tmux: &Tmux) -> Option<CheckResult> {
        const NAME: &str = "orphan-sessions-fix";

        if self.orphans.is_empty() {
            return None;
        }

        let mut killed = 0usize;
        let mut last_err = None;
        for session in &self.orphans {
            match tmux.kill_session(session).await {
                Ok(()) => {
                    info!(session = %session, "killed orphaned session");
                    killed += 1;
                }
                Err(e) => {
                    warn!(session = %session, error = %e, "failed to kill orphaned session");
                    last_err = Some(e);
                }
            }
        }

        Some(match last_err {
            None => CheckResult::ok(NAME, format!("killed {killed} orphaned session(s)")),
            Some(e) => CheckResult::warning(
                NAME,
                format!("killed {killed} of {} orphaned session(s): {e}", self.orphans.len()),
            ),
        })
    }
}

impl Default for OrphanSessionCheck {
    fn default() -> Self {
        Self::new()
    }
}

// ── Process orphans ──────────────────────────────────────────────────────────

/// Split workload-matching processes into trusted and orphaned, by walking
/// each candidate's ancestor chain against the trusted ancestry set.
pub fn classify_processes(
    table: &HashMap<u32, ProcessRecord>,
    trusted: &HashSet<u32>,
) -> (usize, Vec<ProcessRecord>) {
    let mut valid = 0;
    let mut orphans = Vec::new();

    for candidate in procs::matching(table, &WORKLOAD_PATTERN) {
        if procs::has_trusted_ancestor(table, candidate, trusted) {
            valid += 1;
        } else {
            orphans.push(candidate.clone());
        }
    }

    (valid, orphans)
}

/// Trusted ancestry set: every tmux server process plus every pane root of
/// every live session.
pub async fn trusted_ancestry_pids(
    tmux: &Tmux,
    table: &HashMap<u32, ProcessRecord>,
) -> HashSet<u32> {
    let mut trusted: HashSet<u32> = table
        .values()
        .filter(|r| {
            let name = r
                .command
                .split_whitespace()
                .next()
                .unwrap_or("")
                .rsplit('/')
                .next()
                .unwrap_or("");
            name == "tmux" || r.command.starts_with("tmux:")
        })
        .map(|r| r.pid)
        .collect();

    if let Ok(sessions) = tmux.list_sessions().await {
        for session in sessions {
            if let Ok(pids) = tmux.pane_pids(&session).await {
                trusted.extend(pids);
            }
        }
    }

    trusted
}

/// Detects workload processes that escaped the tmux ancestry domain.
pub struct OrphanProcessCheck {
    orphans: Vec<ProcessRecord>,
}

impl OrphanProcessCheck {
    pub fn new() -> Self {
        Self {
            orphans: Vec::new(),
        }
    }

    pub fn orphans(&self) -> &[ProcessRecord] {
        &self.orphans
    }

    pub async fn run(&mut self, tmux: &Tmux) -> CheckResult {
        const NAME: &str = "orphan-processes";

        let table = procs::snapshot();
        let trusted = trusted_ancestry_pids(tmux, &table).await;
        let (valid, orphans) = classify_processes(&table, &trusted);
        self.orphans = orphans;

        if self.orphans.is_empty() {
            if valid == 0 {
                return CheckResult::ok(NAME, "no workload processes found");
            }
            return CheckResult::ok(
                NAME,
                format!("all {valid} workload processes have trusted ancestry"),
            );
        }

        let mut result = CheckResult::warning(
            NAME,
            format!("found {} orphaned workload process(es)", self.orphans.len()),
        );
        result.details = self
            .orphans
            .iter()
            .map(|p| {
                format!(
                    "pid {}: {} (parent: {})",
                    p.pid,
                    p.command,
                    p.parent_pid.unwrap_or(0)
                )
            })
            .collect();
        result.fix_hint = Some("run 'townd doctor --fix' to signal orphaned processes".to_string());
        result
    }

    /// Signal every flagged process: graceful interrupt first, forceful
    /// terminate only when the interrupt cannot be delivered. Continues
    /// through the full list. Returns `None` when there was nothing to fix.
    pub fn fix(&mut self) -> Option<CheckResult> {
        const NAME: &str = "orphan-processes-fix";

        if self.orphans.is_empty() {
            return None;
        }

        let mut signalled = 0usize;
        let mut last_err: Option<std::io::Error> = None;
        for orphan in &self.orphans {
            match procs::send_interrupt(orphan.pid) {
                Ok(()) => {
                    info!(pid = orphan.pid, "interrupted orphaned process");
                    signalled += 1;
                }
                Err(_) => match procs::force_terminate(orphan.pid) {
                    Ok(()) => {
                        info!(pid = orphan.pid, "force-terminated orphaned process");
                        signalled += 1;
                    }
                    Err(e) => {
                        warn!(pid = orphan.pid, error = %e, "failed to signal orphaned process");
                        last_err = Some(e);
                    }
                },
            }
        }

        Some(match last_err {
            None => CheckResult::ok(NAME, format!("signalled {signalled} orphaned process(es)")),
            Some(e) => CheckResult::warning(
                NAME,
                format!(
                    "signalled {signalled} of {} orphaned process(es): {e}",
                    self.orphans.len()
                ),
            ),
        })
    }
}

impl Default for OrphanProcessCheck {
    fn default() -> Self {
        Self::new()
    }
}
