//! Deployment orchestration.
//!
//! On every trigger the orchestrator asks the [`RevisionTracker`] for the
//! remote tip. When it differs from the last revision handed to the
//! supervisor (or when forced) it materializes
//! the new tree, provisions the runtime environment, resolves the launch
//! command from the manifest and hands a fresh [`LaunchRequest`] to the
//! supervisor. Any failure before the hand-off leaves the running process
//! untouched, and the revision stays pending until a later reload succeeds.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::task;
use tracing::{debug, info, instrument};

use crate::config::DaemonConfig;
use crate::git::{Revision, RevisionTracker, WorkingTreeMaterializer};
use crate::manifest;
use crate::runtime::{LaunchRequest, RuntimeEnvironment};
use crate::supervisor::SupervisorHandle;

/// Result of a reload cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Nothing changed and no deploy was forced.
    Unchanged,
    /// A launch request for this revision was accepted by the supervisor.
    Deployed(Revision),
}

/// What to start once a revision is on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub port: u16,
    pub process_type: String,
    pub manifest_file: String,
}

impl LaunchSettings {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            process_type: "web".to_string(),
            manifest_file: manifest::MANIFEST_FILE.to_string(),
        }
    }
}

/// Blocking half of a reload: git, filesystem and environment work.
#[derive(Debug, Clone)]
struct DeployPlanner {
    tracker: Arc<Mutex<RevisionTracker>>,
    materializer: WorkingTreeMaterializer,
    environment: RuntimeEnvironment,
    settings: LaunchSettings,
}

impl DeployPlanner {
    fn plan(
        &self,
        force: bool,
        deployed: Option<Revision>,
    ) -> anyhow::Result<Option<(Revision, LaunchRequest)>> {
        let tracker = self
            .tracker
            .lock()
            .map_err(|_| anyhow::anyhow!("Revision tracker lock poisoned"))?;

        let check = tracker.check_for_update()?;
        info!(updated = check.updated, revision = %check.revision.short(), "update check");
        let pending = deployed != Some(check.revision);
        if !check.updated && !pending && !force {
            return Ok(None);
        }
        if pending && !check.updated {
            debug!(revision = %check.revision.short(), "retrying undeployed revision");
        }

        info!(force, "reloading application");
        self.materializer
            .materialize(tracker.repository(), &check.revision)?;
        self.environment.provision()?;

        let app_dir = self.materializer.target_dir();
        let command = manifest::resolve_command(
            app_dir,
            &self.settings.manifest_file,
            &self.settings.process_type,
        )
        .with_context(|| format!("Failed to resolve launch plan for {}", check.revision))?;

        info!(command = %command, "resolved launch command");
        let request = self
            .environment
            .launch_request(app_dir, self.settings.port, &command);
        Ok(Some((check.revision, request)))
    }
}

/// Top-level coordinator between the tracker and the supervisor.
#[derive(Debug)]
pub struct DeploymentOrchestrator {
    planner: DeployPlanner,
    supervisor: SupervisorHandle,
    /// Last revision accepted by the supervisor. Also serializes reloads.
    deployed: tokio::sync::Mutex<Option<Revision>>,
}

impl DeploymentOrchestrator {
    pub fn new(
        tracker: RevisionTracker,
        materializer: WorkingTreeMaterializer,
        environment: RuntimeEnvironment,
        settings: LaunchSettings,
        supervisor: SupervisorHandle,
    ) -> Self {
        Self {
            planner: DeployPlanner {
                tracker: Arc::new(Mutex::new(tracker)),
                materializer,
                environment,
                settings,
            },
            supervisor,
            deployed: tokio::sync::Mutex::new(None),
        }
    }

    /// Wire an orchestrator from daemon configuration.
    pub fn from_config(
        config: &DaemonConfig,
        supervisor: SupervisorHandle,
    ) -> anyhow::Result<Self> {
        let layout = config.layout();
        let tracker = RevisionTracker::open(layout.mirror_dir(), &config.git_repo, &config.branch)?;
        let materializer = WorkingTreeMaterializer::new(layout.app_dir());
        let environment = RuntimeEnvironment::new(config.runtime, layout.env_dir());
        let settings = LaunchSettings {
            port: config.port,
            process_type: config.process_type.clone(),
            manifest_file: config.manifest.clone(),
        };
        Ok(Self::new(
            tracker,
            materializer,
            environment,
            settings,
            supervisor,
        ))
    }

    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.supervisor
    }

    /// Check for a new revision and redeploy when it exists or `force` is set.
    ///
    /// A revision whose deploy failed is retried on the next reload even
    /// though the local branch already points at it. Returns once the
    /// supervisor accepted the launch; it does not wait for the new process
    /// to become healthy. Reloads are serialized.
    #[instrument(skip(self))]
    pub async fn reload(&self, force: bool) -> anyhow::Result<ReloadOutcome> {
        let mut deployed = self.deployed.lock().await;

        let planner = self.planner.clone();
        let last = *deployed;
        let plan = task::spawn_blocking(move || planner.plan(force, last))
            .await
            .context("Reload task failed")??;

        let Some((revision, request)) = plan else {
            debug!("no update");
            return Ok(ReloadOutcome::Unchanged);
        };

        self.supervisor
            .launch(request)
            .await
            .context("Supervisor rejected launch request")?;
        *deployed = Some(revision);
        info!(revision = %revision.short(), "deploy handed to supervisor");
        Ok(ReloadOutcome::Deployed(revision))
    }
}
