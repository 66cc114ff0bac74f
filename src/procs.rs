//! OS process inspection: table snapshots, ancestry walks, and signals.
//!
//! A snapshot is taken once per inspection pass and walked in memory, so an
//! orphan sweep costs one process-table read regardless of tree depth.
//! Records are never cached across passes; the OS reuses PIDs.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use sysinfo::{ProcessesToUpdate, System};

/// One row of a process-table snapshot. Never cached across passes.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    /// Full command line (name plus arguments).
    pub command: String,
}

/// Fresh snapshot of the full process table, keyed by PID.
pub fn snapshot() -> HashMap<u32, ProcessRecord> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    sys.processes()
        .iter()
        .map(|(pid, proc_)| {
            let command = if proc_.cmd().is_empty() {
                proc_.name().to_string_lossy().into_owned()
            } else {
                proc_
                    .cmd()
                    .iter()
                    .map(|a| a.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            (
                pid.as_u32(),
                ProcessRecord {
                    pid: pid.as_u32(),
                    parent_pid: proc_.parent().map(|p| p.as_u32()),
                    command,
                },
            )
        })
        .collect()
}

/// PIDs whose command matches `pattern` (case sensitivity is the pattern's
/// own business — orphan detection compiles with `(?i)`).
pub fn matching<'a>(
    table: &'a HashMap<u32, ProcessRecord>,
    pattern: &Regex,
) -> Vec<&'a ProcessRecord> {
    let mut hits: Vec<&ProcessRecord> = table
        .values()
        .filter(|r| pattern.is_match(&r.command))
        .collect();
    hits.sort_by_key(|r| r.pid);
    hits
}

/// All descendant PIDs of `root` in the snapshot, including `root` itself.
pub fn subtree(table: &HashMap<u32, ProcessRecord>, root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for rec in table.values() {
        if let Some(ppid) = rec.parent_pid {
            children.entry(ppid).or_default().push(rec.pid);
        }
    }

    let mut out = Vec::new();
    let mut stack = vec![root];
    let mut seen = HashSet::new();
    while let Some(pid) = stack.pop() {
        if !seen.insert(pid) {
            continue;
        }
        out.push(pid);
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids);
        }
    }
    out
}

/// Walk the ancestor chain of `record` looking for a PID in `trusted`.
///
/// Bounded by a visited set: a malformed parent-PID cycle terminates the
/// walk instead of hanging it. Reaching PID 1 (or a dead end) without a hit
/// means no trusted ancestor.
pub fn has_trusted_ancestor(
    table: &HashMap<u32, ProcessRecord>,
    record: &ProcessRecord,
    trusted: &HashSet<u32>,
) -> bool {
    let mut visited = HashSet::new();
    let mut current = record.parent_pid;

    while let Some(pid) = current {
        if pid <= 1 || !visited.insert(pid) {
            return false;
        }
        if trusted.contains(&pid) {
            return true;
        }
        current = table.get(&pid).and_then(|r| r.parent_pid);
    }
    false
}

/// True if `pid` is present in a fresh snapshot.
pub fn process_exists(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]), true);
    sys.process(sysinfo::Pid::from_u32(pid)).is_some()
}

/// Deliver SIGINT — the graceful half of remediation.
#[cfg(unix)]
pub fn send_interrupt(pid: u32) -> std::io::Result<()> {
    // Safety: kill(2) with a plain signal number; no memory is touched.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Deliver SIGKILL — the escalation when the interrupt cannot be delivered.
#[cfg(unix)]
pub fn force_terminate(pid: u32) -> std::io::Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send_interrupt(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signal delivery is unix-only",
    ))
}

#[cfg(not(unix))]
pub fn force_terminate(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signal delivery is unix-only",
    ))
}
