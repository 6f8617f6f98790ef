//! Test harness: in-memory store plus scriptable collaborator fakes, so the
//! suites run hermetically (no Postgres, no compute backend).
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::external::{
    ActivityTracker, InMemoryActivity, ProvisioningBackend, SnapshotBackend, StageExecutor,
};
use crate::models::{Application, Stage};
use crate::store::mem::MemStore;
use crate::{AppState, ServiceSettings};

/// Provisioner whose next provision/teardown can be scripted to fail.
#[derive(Default)]
pub struct ScriptedProvisioner {
    pub fail_provision: Mutex<Option<String>>,
    pub fail_teardown: Mutex<Option<String>>,
}

impl ScriptedProvisioner {
    pub async fn fail_next_provision(&self, reason: &str) {
        *self.fail_provision.lock().await = Some(reason.to_string());
    }
    pub async fn fail_next_teardown(&self, reason: &str) {
        *self.fail_teardown.lock().await = Some(reason.to_string());
    }
}

#[async_trait]
impl ProvisioningBackend for ScriptedProvisioner {
    async fn provision(&self, _app_id: Uuid) -> anyhow::Result<()> {
        match self.fail_provision.lock().await.take() {
            Some(reason) => anyhow::bail!("{reason}"),
            None => Ok(()),
        }
    }
    async fn teardown(&self, _app_id: Uuid) -> anyhow::Result<()> {
        match self.fail_teardown.lock().await.take() {
            Some(reason) => anyhow::bail!("{reason}"),
            None => Ok(()),
        }
    }
}

/// Snapshot backend that remembers handed-off handles and can be scripted to
/// fail creates or restores.
#[derive(Default)]
pub struct ScriptedSnapshots {
    pub handles: DashMap<String, Uuid>,
    pub fail_create: Mutex<Option<String>>,
    pub fail_restore: Mutex<Option<String>>,
}

impl ScriptedSnapshots {
    pub async fn fail_next_create(&self, reason: &str) {
        *self.fail_create.lock().await = Some(reason.to_string());
    }
    pub async fn fail_next_restore(&self, reason: &str) {
        *self.fail_restore.lock().await = Some(reason.to_string());
    }
}

#[async_trait]
impl SnapshotBackend for ScriptedSnapshots {
    async fn create_snapshot(&self, app_id: Uuid, handle: &str) -> anyhow::Result<()> {
        if let Some(reason) = self.fail_create.lock().await.take() {
            anyhow::bail!("{reason}");
        }
        self.handles.insert(handle.to_string(), app_id);
        Ok(())
    }
    async fn restore_snapshot(&self, _app_id: Uuid, handle: &str) -> anyhow::Result<()> {
        if let Some(reason) = self.fail_restore.lock().await.take() {
            anyhow::bail!("{reason}");
        }
        anyhow::ensure!(self.handles.contains_key(handle), "unknown snapshot handle {handle}");
        Ok(())
    }
}

/// Executor with per-stage scripted failures; unscripted stages succeed.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub failures: DashMap<Stage, String>,
}

impl ScriptedExecutor {
    pub fn fail_stage(&self, stage: Stage, reason: &str) {
        self.failures.insert(stage, reason.to_string());
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(&self, _app_id: Uuid, _commit_sha: &str, stage: Stage) -> anyhow::Result<()> {
        if let Some(reason) = self.failures.get(&stage) {
            anyhow::bail!("{}", reason.value());
        }
        Ok(())
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub provisioner: Arc<ScriptedProvisioner>,
    pub snapshots: Arc<ScriptedSnapshots>,
    pub activity: Arc<InMemoryActivity>,
    pub executor: Arc<ScriptedExecutor>,
}

pub fn harness() -> TestHarness {
    harness_with(ServiceSettings::default())
}

pub fn harness_with(settings: ServiceSettings) -> TestHarness {
    let provisioner = Arc::new(ScriptedProvisioner::default());
    let snapshots = Arc::new(ScriptedSnapshots::default());
    let activity = Arc::new(InMemoryActivity::default());
    let executor = Arc::new(ScriptedExecutor::default());
    let state = AppState::new(
        Arc::new(MemStore::new()),
        provisioner.clone() as Arc<dyn ProvisioningBackend>,
        snapshots.clone() as Arc<dyn SnapshotBackend>,
        activity.clone() as Arc<dyn ActivityTracker>,
        executor.clone() as Arc<dyn StageExecutor>,
        settings,
    );
    TestHarness { state, provisioner, snapshots, activity, executor }
}

/// Fresh in-memory `AppState` with all-green collaborators.
pub fn test_state() -> AppState {
    harness().state
}

/// Create an app and drive it to `live`.
pub async fn live_app(state: &AppState, name: &str) -> Application {
    let app = state
        .lifecycle
        .create_app(name, Uuid::new_v4(), "eu-central-1", "starter")
        .await
        .expect("create app");
    state.lifecycle.provision_app(app.id).await.expect("provision app");
    state.lifecycle.get_app(app.id).await.expect("reload app")
}

/// Poll an async condition until it holds or ~2s elapse.
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
