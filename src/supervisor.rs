//! Background supervision loop — polls each agent on its backoff schedule.
//!
//! Agents are probed sequentially within a sweep, which also guarantees at
//! most one in-flight probe per agent.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::agents::lifecycle::AgentManager;
use crate::scheduler::backoff::SharedBackoffRegistry;

/// Probe every agent whose backoff interval has elapsed; feed the outcome
/// back into the scheduler.
pub async fn sweep_once(registry: &SharedBackoffRegistry, managers: &[Arc<AgentManager>]) {
    for manager in managers {
        let agent_id = manager.spec().agent_id.clone();

        let due = registry.write().await.should_poll(&agent_id);
        if !due {
            continue;
        }

        let healthy = manager.is_healthy().await;

        let mut reg = registry.write().await;
        reg.record_poke(&agent_id);
        if healthy {
            reg.record_activity(&agent_id);
            debug!(agent_id = %agent_id, "agent healthy");
        } else {
            reg.record_miss(&agent_id);
            warn!(
                agent_id = %agent_id,
                next_interval_secs = reg.interval_for(&agent_id).as_secs(),
                "agent missed poll — backing off"
            );
        }
    }

    debug!(intervals = ?registry.read().await.snapshot_all(), "sweep complete");
}

/// Run supervision sweeps forever at the given cadence.
pub async fn run(
    registry: SharedBackoffRegistry,
    managers: Vec<Arc<AgentManager>>,
    tick: Duration,
) {
    info!(agents = managers.len(), tick_secs = tick.as_secs(), "supervisor loop started");
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        sweep_once(&registry, &managers).await;
    }
}
