//! Periodic reload trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::orchestrator::{DeploymentOrchestrator, ReloadOutcome};

/// Drives [`DeploymentOrchestrator::reload`] on a fixed interval.
///
/// The first tick fires immediately and is forced. Ticks keep forcing until
/// one forced deploy succeeds, so a daemon that boots while the remote is
/// unreachable still deploys once it comes back.
#[derive(Debug, Clone)]
pub struct Scheduler {
    orchestrator: Arc<DeploymentOrchestrator>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<DeploymentOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Run forever. Reload errors are logged and retried on the next tick.
    pub async fn run(self) {
        let mut ticker = time::interval(self.interval);
        // A slow reload delays later ticks instead of bursting to catch up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut force = true;
        loop {
            ticker.tick().await;
            match self.orchestrator.reload(force).await {
                Ok(ReloadOutcome::Deployed(revision)) => {
                    info!(revision = %revision.short(), "deployed");
                    force = false;
                }
                Ok(ReloadOutcome::Unchanged) => {
                    debug!("no changes");
                    force = false;
                }
                Err(err) => {
                    warn!(error = %format!("{err:#}"), force, "reload failed");
                }
            }
        }
    }
}
