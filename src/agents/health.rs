//! Session health classification — "is the real workload running, or is
//! this a zombie session?"
//!
//! tmux sometimes runs the agent binary directly as the pane's foreground
//! process and sometimes runs it behind an interposed shell, so the check is
//! two-tier: match the foreground command first, then search the pane's
//! descendant process subtree. Classification is a total function: a missing
//! session or a failed lookup is NotRunning, never an error.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::procs::{self, ProcessRecord};
use crate::tmux::SessionControl;

/// Foreground commands that directly indicate a live agent workload.
pub const WORKLOAD_INDICATORS: &[&str] = &["node", "claude"];

/// Shells that may be interposed between the pane and the workload.
pub const SHELLS: &[&str] = &["bash", "zsh", "sh", "fish"];

/// Some agent builds report their version string as the process title
/// (e.g. `2.0.76`). A bare semver prefix counts as a workload.
static VERSION_BANNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+").unwrap_or_else(|e| panic!("version regex: {e}")));

/// True if a foreground command string indicates the default workload:
/// an exact indicator match or a version banner.
pub fn command_is_workload(cmd: &str) -> bool {
    WORKLOAD_INDICATORS.contains(&cmd) || VERSION_BANNER.is_match(cmd)
}

/// Base name of the first token of a command line
/// (`"/usr/local/bin/node app.js"` → `"node"`).
fn command_name(cmdline: &str) -> &str {
    let first = cmdline.split_whitespace().next().unwrap_or("");
    first.rsplit('/').next().unwrap_or(first)
}

/// True if any process in the subtree rooted at `root` runs one of
/// `indicators`.
pub fn subtree_has_indicator(
    table: &HashMap<u32, ProcessRecord>,
    root: u32,
    indicators: &[&str],
) -> bool {
    if indicators.is_empty() {
        return false;
    }
    procs::subtree(table, root)
        .into_iter()
        .filter_map(|pid| table.get(&pid))
        .any(|rec| indicators.contains(&command_name(&rec.command)))
}

/// Is the default workload (node/claude, or a version banner) genuinely
/// occupying `session`?
pub async fn is_workload_running(sessions: &dyn SessionControl, session: &str) -> bool {
    let cmd = match sessions.pane_command(session).await {
        Ok(cmd) => cmd,
        Err(_) => return false,
    };

    if command_is_workload(&cmd) {
        return true;
    }

    // A shell in the foreground may still be hosting the workload as a
    // descendant (shell wrapper launch path).
    if SHELLS.contains(&cmd.as_str()) {
        if let Ok(root) = sessions.pane_pid(session).await {
            let table = procs::snapshot();
            return subtree_has_indicator(&table, root, WORKLOAD_INDICATORS);
        }
    }

    false
}

/// Generalized liveness check against a caller-supplied indicator set.
/// An empty set can match nothing, so it classifies NotRunning.
pub async fn is_agent_running(
    sessions: &dyn SessionControl,
    session: &str,
    indicators: &[&str],
) -> bool {
    if indicators.is_empty() {
        return false;
    }

    let cmd = match sessions.pane_command(session).await {
        Ok(cmd) => cmd,
        Err(_) => return false,
    };

    if indicators.contains(&cmd.as_str()) {
        return true;
    }

    if SHELLS.contains(&cmd.as_str()) {
        if let Ok(root) = sessions.pane_pid(session).await {
            let table = procs::snapshot();
            return subtree_has_indicator(&table, root, indicators);
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreground_workload_classification() {
        // Direct indicators.
        assert!(command_is_workload("node"));
        assert!(command_is_workload("claude"));

        // Version banners.
        assert!(command_is_workload("2.0.76"));
        assert!(command_is_workload("1.2.3"));
        assert!(command_is_workload("10.20.30"));

        // Shells and junk.
        assert!(!command_is_workload("bash"));
        assert!(!command_is_workload("zsh"));
        assert!(!command_is_workload(""));
        assert!(!command_is_workload("v2.0.76"));
        assert!(!command_is_workload("2.0"));
    }

    #[test]
    fn command_name_strips_path_and_args() {
        assert_eq!(command_name("/usr/local/bin/node app.js"), "node");
        assert_eq!(command_name("claude --resume"), "claude");
        assert_eq!(command_name("zsh"), "zsh");
        assert_eq!(command_name(""), "");
    }

    #[test]
    fn subtree_search_finds_interposed_workload() {
        let recs = [
            (100u32, None, "tmux: server"),
            (200, Some(100), "zsh"),
            (300, Some(200), "/usr/local/bin/node /opt/agent/cli.js"),
        ];
        let table: HashMap<u32, ProcessRecord> = recs
            .iter()
            .map(|&(pid, parent_pid, command)| {
                (
                    pid,
                    ProcessRecord {
                        pid,
                        parent_pid,
                        command: command.to_string(),
                    },
                )
            })
            .collect();

        assert!(subtree_has_indicator(&table, 200, WORKLOAD_INDICATORS));
        // The tmux server's subtree includes the pane shell's children.
        assert!(subtree_has_indicator(&table, 100, WORKLOAD_INDICATORS));
        // No indicators means nothing can match.
        assert!(!subtree_has_indicator(&table, 200, &[]));
        // A subtree of just shells stays NotRunning.
        assert!(!subtree_has_indicator(&table, 300, &["gemini"]));
    }
}
