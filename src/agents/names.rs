//! Session-name grammar: `gt-mayor`, `gt-deacon`, or `gt-<rig>-<role>`.
//!
//! Role tokens beyond witness/refinery are accepted permissively — polecat
//! and crew names cannot be enumerated without reading workload state, and
//! the orphan check prefers missing a true orphan over killing a legitimate
//! worker.

use std::collections::HashSet;

/// Prefix that puts a session inside this system's naming domain.
pub const SESSION_PREFIX: &str = "gt-";

/// The two fixed town-level singleton sessions.
pub const MAYOR_SESSION: &str = "gt-mayor";
pub const DEACON_SESSION: &str = "gt-deacon";

/// A parsed rig-scoped session identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionIdentity {
    Mayor,
    Deacon,
    /// `gt-<rig>-<role>`; role is witness, refinery, or a worker name.
    RigScoped { rig: String, role: String },
}

impl SessionIdentity {
    /// Parse a session name within the `gt-` domain. Returns `None` for
    /// names outside the domain or too short to carry a rig and role.
    pub fn parse(session: &str) -> Option<Self> {
        if session == MAYOR_SESSION {
            return Some(Self::Mayor);
        }
        if session == DEACON_SESSION {
            return Some(Self::Deacon);
        }

        let rest = session.strip_prefix(SESSION_PREFIX)?;
        // Split on the first separator only: role tokens may contain dashes.
        let (rig, role) = rest.split_once('-')?;
        if rig.is_empty() || role.is_empty() {
            return None;
        }
        Some(Self::RigScoped {
            rig: rig.to_string(),
            role: role.to_string(),
        })
    }
}

/// Session name for a town-level or rig-scoped agent.
pub fn session_name(rig: Option<&str>, role: &str) -> String {
    match rig {
        Some(rig) => format!("{SESSION_PREFIX}{rig}-{role}"),
        None => format!("{SESSION_PREFIX}{role}"),
    }
}

/// True if `session` names an agent this town currently knows about.
///
/// Valid: the two singletons, and any `gt-<rig>-<role>` where `rig` is a
/// member of `valid_rigs`. Anything else in the `gt-` domain is an orphan.
pub fn is_valid_session(session: &str, valid_rigs: &HashSet<String>) -> bool {
    match SessionIdentity::parse(session) {
        Some(SessionIdentity::Mayor | SessionIdentity::Deacon) => true,
        Some(SessionIdentity::RigScoped { rig, .. }) => valid_rigs.contains(&rig),
        None => false,
    }
}
