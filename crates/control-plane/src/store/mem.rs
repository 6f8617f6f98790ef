//! In-process store. A single async mutex over all tables gives the same
//! atomicity the Postgres transactions do (history append + cache update are
//! never observable half-done).
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NewApp, Store};
use crate::error::{Error, Result};
use crate::models::{
    AppStateHistoryEntry, Application, Backup, CommitInfo, Deployment, DeploymentLogLine,
    RestoreJob, RestoreJobStatus, Stages,
};
use crate::state::LifecycleState;

#[derive(Default)]
struct Tables {
    apps: HashMap<Uuid, Application>,
    // Append-only vecs keep insertion order, which is also timestamp order.
    history: Vec<AppStateHistoryEntry>,
    deployments: HashMap<Uuid, Deployment>,
    logs: Vec<DeploymentLogLine>,
    backups: HashMap<Uuid, Backup>,
    restore_jobs: HashMap<Uuid, RestoreJob>,
}

#[derive(Default)]
pub struct MemStore {
    tables: Mutex<Tables>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_app(&self, new: NewApp) -> Result<Application> {
        let mut t = self.tables.lock().await;
        if t.apps.values().any(|a| a.name == new.name) {
            return Err(Error::AlreadyExists { kind: "application", name: new.name });
        }
        let now = Utc::now();
        let app = Application {
            id: Uuid::new_v4(),
            name: new.name,
            workspace_id: new.workspace_id,
            region: new.region,
            plan: new.plan,
            desired_state: LifecycleState::Uninitialized.code(),
            paused: false,
            is_provisioned: false,
            created_at: now,
            updated_at: now,
        };
        t.history.push(AppStateHistoryEntry {
            id: Uuid::new_v4(),
            app_id: app.id,
            state_id: LifecycleState::Uninitialized.code(),
            message: Some("application created".into()),
            created_at: now,
        });
        t.apps.insert(app.id, app.clone());
        Ok(app)
    }

    async fn get_app(&self, id: Uuid) -> Result<Option<Application>> {
        Ok(self.tables.lock().await.apps.get(&id).cloned())
    }

    async fn find_app_by_name(&self, name: &str) -> Result<Option<Application>> {
        Ok(self.tables.lock().await.apps.values().find(|a| a.name == name).cloned())
    }

    async fn list_apps(&self) -> Result<Vec<Application>> {
        let t = self.tables.lock().await;
        let mut apps: Vec<_> = t.apps.values().cloned().collect();
        apps.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(apps)
    }

    async fn record_transition(
        &self,
        app_id: Uuid,
        state: LifecycleState,
        message: Option<String>,
    ) -> Result<AppStateHistoryEntry> {
        let mut t = self.tables.lock().await;
        let app = t
            .apps
            .get_mut(&app_id)
            .ok_or_else(|| Error::not_found("application", app_id))?;
        let now = Utc::now();
        app.desired_state = state.code();
        app.paused = state == LifecycleState::Paused;
        if state == LifecycleState::Live {
            app.is_provisioned = true;
        }
        app.updated_at = now;
        let entry = AppStateHistoryEntry {
            id: Uuid::new_v4(),
            app_id,
            state_id: state.code(),
            message,
            created_at: now,
        };
        t.history.push(entry.clone());
        Ok(entry)
    }

    async fn latest_history(&self, app_id: Uuid) -> Result<Option<AppStateHistoryEntry>> {
        let t = self.tables.lock().await;
        Ok(t.history.iter().rev().find(|h| h.app_id == app_id).cloned())
    }

    async fn history(&self, app_id: Uuid) -> Result<Vec<AppStateHistoryEntry>> {
        let t = self.tables.lock().await;
        Ok(t.history.iter().filter(|h| h.app_id == app_id).cloned().collect())
    }

    async fn insert_deployment(&self, app_id: Uuid, commit: CommitInfo) -> Result<Deployment> {
        let mut t = self.tables.lock().await;
        let deployment = Deployment {
            id: Uuid::new_v4(),
            app_id,
            commit,
            stages: Stages::default(),
            created_at: Utc::now(),
        };
        t.deployments.insert(deployment.id, deployment.clone());
        Ok(deployment)
    }

    async fn get_deployment(&self, id: Uuid) -> Result<Option<Deployment>> {
        Ok(self.tables.lock().await.deployments.get(&id).cloned())
    }

    async fn list_deployments(&self, app_id: Uuid) -> Result<Vec<Deployment>> {
        let t = self.tables.lock().await;
        let mut deployments: Vec<_> =
            t.deployments.values().filter(|d| d.app_id == app_id).cloned().collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(deployments)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.deployments.contains_key(&deployment.id) {
            return Err(Error::not_found("deployment", deployment.id));
        }
        t.deployments.insert(deployment.id, deployment.clone());
        Ok(())
    }

    async fn append_log(&self, deployment_id: Uuid, message: &str) -> Result<DeploymentLogLine> {
        let mut t = self.tables.lock().await;
        let line = DeploymentLogLine {
            id: Uuid::new_v4(),
            deployment_id,
            message: message.to_string(),
            created_at: Utc::now(),
        };
        t.logs.push(line.clone());
        Ok(line)
    }

    async fn logs(&self, deployment_id: Uuid) -> Result<Vec<DeploymentLogLine>> {
        let t = self.tables.lock().await;
        Ok(t.logs.iter().filter(|l| l.deployment_id == deployment_id).cloned().collect())
    }

    async fn insert_backup(&self, app_id: Uuid) -> Result<Backup> {
        let mut t = self.tables.lock().await;
        let backup = Backup {
            id: Uuid::new_v4(),
            app_id,
            size: 0,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        };
        t.backups.insert(backup.id, backup.clone());
        Ok(backup)
    }

    async fn get_backup(&self, id: Uuid) -> Result<Option<Backup>> {
        Ok(self.tables.lock().await.backups.get(&id).cloned())
    }

    async fn list_backups(&self, app_id: Uuid) -> Result<Vec<Backup>> {
        let t = self.tables.lock().await;
        let mut backups: Vec<_> =
            t.backups.values().filter(|b| b.app_id == app_id).cloned().collect();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(backups)
    }

    async fn update_backup(&self, backup: &Backup) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.backups.contains_key(&backup.id) {
            return Err(Error::not_found("backup", backup.id));
        }
        t.backups.insert(backup.id, backup.clone());
        Ok(())
    }

    async fn list_stale_backups(&self, cutoff: DateTime<Utc>) -> Result<Vec<Backup>> {
        let t = self.tables.lock().await;
        let mut stale: Vec<_> = t
            .backups
            .values()
            .filter(|b| b.completed_at.is_none() && b.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(stale)
    }

    async fn insert_restore_job(&self, app_id: Uuid, backup_id: Uuid) -> Result<RestoreJob> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let job = RestoreJob {
            id: Uuid::new_v4(),
            app_id,
            backup_id,
            status: RestoreJobStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
        };
        t.restore_jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_restore_job(&self, id: Uuid) -> Result<Option<RestoreJob>> {
        Ok(self.tables.lock().await.restore_jobs.get(&id).cloned())
    }

    async fn update_restore_job(&self, job: &RestoreJob) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.restore_jobs.contains_key(&job.id) {
            return Err(Error::not_found("restore job", job.id));
        }
        let mut job = job.clone();
        job.updated_at = Utc::now();
        t.restore_jobs.insert(job.id, job);
        Ok(())
    }
}
