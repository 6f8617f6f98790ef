//! Persistence seam for the control plane.
//!
//! The `Store` trait is the only way the services touch durable state. Two
//! implementations: [`pg::PgStore`] (Postgres via sqlx, production) and
//! [`mem::MemStore`] (in-process, used by tests and `NIMBUS_IN_MEMORY=1`
//! dev mode).
pub mod mem;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AppStateHistoryEntry, Application, Backup, CommitInfo, Deployment, DeploymentLogLine,
    RestoreJob,
};
use crate::state::LifecycleState;

#[derive(Debug, Clone)]
pub struct NewApp {
    pub name: String,
    pub workspace_id: Uuid,
    pub region: String,
    pub plan: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert the app row together with its initial `Uninitialized` history
    /// row, in one transaction.
    async fn insert_app(&self, new: NewApp) -> Result<Application>;
    async fn get_app(&self, id: Uuid) -> Result<Option<Application>>;
    async fn find_app_by_name(&self, name: &str) -> Result<Option<Application>>;
    async fn list_apps(&self) -> Result<Vec<Application>>;

    /// Append a history row and update the app's `desired_state` cache (plus
    /// the `paused`/`is_provisioned` flags it implies) atomically. Legality
    /// of the transition is the lifecycle controller's concern, not the
    /// store's.
    async fn record_transition(
        &self,
        app_id: Uuid,
        state: LifecycleState,
        message: Option<String>,
    ) -> Result<AppStateHistoryEntry>;
    async fn latest_history(&self, app_id: Uuid) -> Result<Option<AppStateHistoryEntry>>;
    async fn history(&self, app_id: Uuid) -> Result<Vec<AppStateHistoryEntry>>;

    async fn insert_deployment(&self, app_id: Uuid, commit: CommitInfo) -> Result<Deployment>;
    async fn get_deployment(&self, id: Uuid) -> Result<Option<Deployment>>;
    async fn list_deployments(&self, app_id: Uuid) -> Result<Vec<Deployment>>;
    async fn update_deployment(&self, deployment: &Deployment) -> Result<()>;
    async fn append_log(&self, deployment_id: Uuid, message: &str) -> Result<DeploymentLogLine>;
    async fn logs(&self, deployment_id: Uuid) -> Result<Vec<DeploymentLogLine>>;

    async fn insert_backup(&self, app_id: Uuid) -> Result<Backup>;
    async fn get_backup(&self, id: Uuid) -> Result<Option<Backup>>;
    async fn list_backups(&self, app_id: Uuid) -> Result<Vec<Backup>>;
    async fn update_backup(&self, backup: &Backup) -> Result<()>;
    /// Backups still pending (`completed_at` null) created before `cutoff`.
    async fn list_stale_backups(&self, cutoff: DateTime<Utc>) -> Result<Vec<Backup>>;

    async fn insert_restore_job(&self, app_id: Uuid, backup_id: Uuid) -> Result<RestoreJob>;
    async fn get_restore_job(&self, id: Uuid) -> Result<Option<RestoreJob>>;
    async fn update_restore_job(&self, job: &RestoreJob) -> Result<()>;
}
