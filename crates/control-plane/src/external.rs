//! Collaborator contracts. The control plane never talks to compute,
//! object storage or the activity feed directly; it goes through these
//! traits. Failure messages flow back verbatim into durable history /
//! backup annotations.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::Stage;

/// Provision/teardown of the underlying compute for one app. Each call must
/// resolve to ready / torn down, or an error carrying the backend's reason.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    async fn provision(&self, app_id: Uuid) -> anyhow::Result<()>;
    async fn teardown(&self, app_id: Uuid) -> anyhow::Result<()>;
}

/// Point-in-time database snapshots. `handle` is opaque to the backend and
/// stable across retries, so both calls are idempotent per handle.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    async fn create_snapshot(&self, app_id: Uuid, handle: &str) -> anyhow::Result<()>;
    async fn restore_snapshot(&self, app_id: Uuid, handle: &str) -> anyhow::Result<()>;
}

/// Last authenticated access per app, fed by the gateway.
#[async_trait]
pub trait ActivityTracker: Send + Sync {
    async fn last_seen(&self, app_id: Uuid) -> Option<DateTime<Utc>>;
}

/// Performs the actual work of one pipeline stage (hasura metadata apply,
/// SQL migrations, functions deploy) for a commit.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, app_id: Uuid, commit_sha: &str, stage: Stage) -> anyhow::Result<()>;
}

/// Dev-mode provisioner: acknowledges everything immediately, so the binary
/// runs without a real compute backend wired in.
pub struct AlwaysReadyProvisioner;

#[async_trait]
impl ProvisioningBackend for AlwaysReadyProvisioner {
    async fn provision(&self, app_id: Uuid) -> anyhow::Result<()> {
        tracing::debug!(%app_id, "provisioner.noop.provision");
        Ok(())
    }
    async fn teardown(&self, app_id: Uuid) -> anyhow::Result<()> {
        tracing::debug!(%app_id, "provisioner.noop.teardown");
        Ok(())
    }
}

/// Dev-mode snapshot backend: records handed-off handles so restores of
/// known handles succeed.
#[derive(Default)]
pub struct InProcessSnapshots {
    handles: DashMap<String, Uuid>,
}

#[async_trait]
impl SnapshotBackend for InProcessSnapshots {
    async fn create_snapshot(&self, app_id: Uuid, handle: &str) -> anyhow::Result<()> {
        self.handles.insert(handle.to_string(), app_id);
        Ok(())
    }
    async fn restore_snapshot(&self, _app_id: Uuid, handle: &str) -> anyhow::Result<()> {
        if self.handles.contains_key(handle) {
            Ok(())
        } else {
            anyhow::bail!("unknown snapshot handle {handle}")
        }
    }
}

/// In-memory last-seen registry; the gateway (or tests) call [`Self::touch`].
#[derive(Default)]
pub struct InMemoryActivity {
    seen: DashMap<Uuid, DateTime<Utc>>,
}

impl InMemoryActivity {
    pub fn touch(&self, app_id: Uuid) {
        self.seen.insert(app_id, Utc::now());
    }

    pub fn set_last_seen(&self, app_id: Uuid, at: DateTime<Utc>) {
        self.seen.insert(app_id, at);
    }
}

#[async_trait]
impl ActivityTracker for InMemoryActivity {
    async fn last_seen(&self, app_id: Uuid) -> Option<DateTime<Utc>> {
        self.seen.get(&app_id).map(|e| *e.value())
    }
}

/// Dev-mode executor: every stage succeeds after a short simulated delay.
pub struct SimulatedExecutor;

#[async_trait]
impl StageExecutor for SimulatedExecutor {
    async fn execute(&self, app_id: Uuid, commit_sha: &str, stage: Stage) -> anyhow::Result<()> {
        tracing::debug!(%app_id, commit_sha, %stage, "executor.simulated");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        Ok(())
    }
}
