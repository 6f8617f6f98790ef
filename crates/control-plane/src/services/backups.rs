//! Backup creation, fleet-wide scheduling, and restores.
//!
//! A backup row with `completed_at = NULL` is in flight; the snapshot worker
//! reports completion through [`BackupScheduler::complete_backup`]. Stale
//! pending backups are surfaced to operators by the sweep loop and never
//! auto-retried.
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::external::SnapshotBackend;
use crate::models::{Backup, BulkBackupFailure, BulkBackupReport, RestoreJob, RestoreJobStatus};
use crate::services::lifecycle::LifecycleController;
use crate::state::LifecycleState;
use crate::store::Store;
use crate::telemetry::BACKUPS_TOTAL;

pub struct BackupScheduler {
    store: Arc<dyn Store>,
    lifecycle: Arc<LifecycleController>,
    snapshots: Arc<dyn SnapshotBackend>,
    staleness: Duration,
}

impl BackupScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        lifecycle: Arc<LifecycleController>,
        snapshots: Arc<dyn SnapshotBackend>,
        staleness: Duration,
    ) -> Self {
        Self { store, lifecycle, snapshots, staleness }
    }

    /// Insert the pending backup row and hand off to the snapshot backend.
    /// The backup id doubles as the opaque snapshot handle, so a backend
    /// retry with the same handle stays idempotent. A hand-off failure is
    /// recorded durably on the row before the error propagates.
    pub async fn create_backup(&self, app_id: Uuid) -> Result<Backup> {
        self.lifecycle.ensure_live(app_id).await?;
        let mut backup = self.store.insert_backup(app_id).await?;
        if let Err(e) = self.snapshots.create_snapshot(app_id, &backup.id.to_string()).await {
            let message = format!("snapshot hand-off failed: {e}");
            tracing::error!(%app_id, backup_id = %backup.id, error = %e, "snapshot hand-off failed");
            backup.error = Some(message.clone());
            self.store.update_backup(&backup).await?;
            BACKUPS_TOTAL.with_label_values(&["failed"]).inc();
            return Err(Error::ExternalFailure(message));
        }
        BACKUPS_TOTAL.with_label_values(&["created"]).inc();
        tracing::info!(%app_id, backup_id = %backup.id, "backup scheduled");
        Ok(backup)
    }

    /// Called by the snapshot worker on success. A second call for the same
    /// backup is a no-op returning the stored row.
    pub async fn complete_backup(&self, backup_id: Uuid, size: i64) -> Result<Backup> {
        let mut backup = self
            .store
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| Error::not_found("backup", backup_id))?;
        if backup.is_completed() {
            return Ok(backup);
        }
        backup.size = size;
        backup.completed_at = Some(Utc::now().max(backup.created_at));
        backup.error = None;
        self.store.update_backup(&backup).await?;
        BACKUPS_TOTAL.with_label_values(&["completed"]).inc();
        tracing::info!(backup_id = %backup.id, size, "backup completed");
        Ok(backup)
    }

    pub async fn list_backups(&self, app_id: Uuid) -> Result<Vec<Backup>> {
        self.lifecycle.get_app(app_id).await?;
        self.store.list_backups(app_id).await
    }

    pub async fn get_backup(&self, backup_id: Uuid) -> Result<Backup> {
        self.store
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| Error::not_found("backup", backup_id))
    }

    /// Fleet-wide backup. Best effort: one app failing its liveness check
    /// (or its hand-off) is collected, never aborts the batch.
    pub async fn schedule_backup_all(&self) -> Result<BulkBackupReport> {
        let mut report = BulkBackupReport::default();
        for app in self.store.list_apps().await? {
            match self.create_backup(app.id).await {
                Ok(backup) => report.backup_ids.push(backup.id),
                Err(e) => {
                    report.failures.push(BulkBackupFailure { app_id: app.id, error: e.to_string() })
                }
            }
        }
        tracing::info!(
            created = report.backup_ids.len(),
            failed = report.failures.len(),
            "fleet backup run finished"
        );
        Ok(report)
    }

    /// Synchronous restore. The Updating transition serializes this against
    /// deployments and other restores on the same app: only Live admits it.
    pub async fn restore_backup(&self, app_id: Uuid, backup_id: Uuid) -> Result<()> {
        self.lifecycle.ensure_live(app_id).await?;
        let backup = self.get_backup(backup_id).await?;
        if backup.app_id != app_id {
            return Err(Error::not_found("backup", backup_id));
        }
        if !backup.is_completed() {
            return Err(Error::BackupIncomplete(backup_id));
        }
        self.lifecycle
            .request_transition(
                app_id,
                LifecycleState::Updating,
                Some(format!("restoring backup {backup_id}")),
            )
            .await?;
        match self.snapshots.restore_snapshot(app_id, &backup_id.to_string()).await {
            Ok(()) => {
                self.lifecycle
                    .request_transition(
                        app_id,
                        LifecycleState::Live,
                        Some(format!("restore of backup {backup_id} completed")),
                    )
                    .await?;
                Ok(())
            }
            Err(e) => {
                let message = format!("restore of backup {backup_id} failed: {e}");
                tracing::error!(%app_id, %backup_id, error = %e, "restore failed");
                self.lifecycle
                    .request_transition(app_id, LifecycleState::Errored, Some(message.clone()))
                    .await?;
                Err(Error::ExternalFailure(message))
            }
        }
    }

    /// Asynchronous restore: returns a job id immediately. Backup ownership,
    /// completeness and app state are re-validated when the job runs, not
    /// when it is enqueued.
    pub async fn schedule_restore_backup(
        self: &Arc<Self>,
        app_id: Uuid,
        backup_id: Uuid,
    ) -> Result<RestoreJob> {
        self.lifecycle.get_app(app_id).await?;
        let job = self.store.insert_restore_job(app_id, backup_id).await?;
        tracing::info!(job_id = %job.id, %app_id, %backup_id, "restore scheduled");
        let scheduler = Arc::clone(self);
        let job_id = job.id;
        tokio::spawn(async move {
            scheduler.run_restore_job(job_id, app_id, backup_id).await;
        });
        Ok(job)
    }

    async fn run_restore_job(&self, job_id: Uuid, app_id: Uuid, backup_id: Uuid) {
        let mut job = match self.store.get_restore_job(job_id).await {
            Ok(Some(j)) => j,
            _ => return,
        };
        job.status = RestoreJobStatus::Running;
        if let Err(e) = self.store.update_restore_job(&job).await {
            tracing::error!(%job_id, error = %e, "restore job not marked running");
            return;
        }
        match self.restore_backup(app_id, backup_id).await {
            Ok(()) => {
                job.status = RestoreJobStatus::Succeeded;
                job.error = None;
            }
            Err(e) => {
                job.status = RestoreJobStatus::Failed;
                job.error = Some(e.to_string());
            }
        }
        if let Err(e) = self.store.update_restore_job(&job).await {
            tracing::error!(%job_id, error = %e, "restore job outcome not recorded");
        }
    }

    pub async fn get_restore_job(&self, job_id: Uuid) -> Result<RestoreJob> {
        self.store
            .get_restore_job(job_id)
            .await?
            .ok_or_else(|| Error::not_found("restore job", job_id))
    }

    /// Pending backups older than the staleness threshold.
    pub async fn stale_backups(&self) -> Result<Vec<Backup>> {
        self.store.list_stale_backups(Utc::now() - self.staleness).await
    }

    /// Operator-visibility sweep; warns, never retries.
    pub async fn run_stale_sweep(&self, interval: std::time::Duration) {
        loop {
            match self.stale_backups().await {
                Ok(stale) => {
                    for backup in stale {
                        tracing::warn!(
                            backup_id = %backup.id,
                            app_id = %backup.app_id,
                            created_at = %backup.created_at,
                            "backup still pending past staleness threshold"
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "stale backup sweep failed"),
            }
            tokio::time::sleep(interval).await;
        }
    }
}
