//! doctor — fleet health checks and remediation.
//!
//! Each check runs stateless against live ground truth and reports a
//! `CheckResult`; fixable checks expose a remediation pass that works
//! through its full finding list best-effort, surfacing one aggregated
//! error rather than aborting on the first failure.

pub mod orphans;

use std::path::PathBuf;

use serde::Serialize;

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
}

/// Report from one doctor check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
}

impl CheckResult {
    pub fn ok(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Ok,
            message: message.into(),
            details: Vec::new(),
            fix_hint: None,
        }
    }

    pub fn warning(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Warning,
            message: message.into(),
            details: Vec::new(),
            fix_hint: None,
        }
    }
}

/// Inputs shared by every check.
#[derive(Debug, Clone)]
pub struct DoctorContext {
    pub town_root: PathBuf,
}

/// Run all checks. With `fix`, remediate what the detectors flagged.
pub async fn run(ctx: &DoctorContext, fix: bool) -> Vec<CheckResult> {
    let tmux = crate::tmux::Tmux::new();

    let mut session_check = orphans::OrphanSessionCheck::new();
    let mut process_check = orphans::OrphanProcessCheck::new();

    let mut results = vec![
        session_check.run(&tmux, &ctx.town_root).await,
        process_check.run(&tmux).await,
    ];

    if fix {
        if let Some(result) = session_check.fix(&tmux).await {
            results.push(result);
        }
        if let Some(result) = process_check.fix() {
            results.push(result);
        }
    }

    results
}

/// Render check results to stdout.
pub fn print_results(results: &[CheckResult]) {
    for r in results {
        let symbol = match r.status {
            CheckStatus::Ok => "✓",
            CheckStatus::Warning => "!",
        };
        println!("  {symbol}  {:<20} {}", r.name, r.message);
        for d in &r.details {
            println!("       {d}");
        }
        if let Some(hint) = &r.fix_hint {
            println!("       hint: {hint}");
        }
    }
}
