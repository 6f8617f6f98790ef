//! Postgres store. Runtime-checked queries; schema lives under
//! `migrations/` and is applied by [`crate::db::init_db`].
//!
//! Deployments are persisted as the historical flat per-stage column bundle
//! and folded into the [`Stages`] record on read, so the stage-generic
//! pipeline logic never sees the columns.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use super::{NewApp, Store};
use crate::error::{Error, Result};
use crate::models::{
    AppStateHistoryEntry, Application, Backup, CommitInfo, Deployment, DeploymentLogLine,
    RestoreJob, RestoreJobStatus, StageRecord, StageStatus, Stages,
};
use crate::state::LifecycleState;

pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

const APP_COLS: &str =
    "id, name, workspace_id, region, plan, desired_state, paused, is_provisioned, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AppRow {
    id: Uuid,
    name: String,
    workspace_id: Uuid,
    region: String,
    plan: String,
    desired_state: i32,
    paused: bool,
    is_provisioned: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AppRow> for Application {
    fn from(r: AppRow) -> Self {
        Application {
            id: r.id,
            name: r.name,
            workspace_id: r.workspace_id,
            region: r.region,
            plan: r.plan,
            desired_state: r.desired_state,
            paused: r.paused,
            is_provisioned: r.is_provisioned,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    app_id: Uuid,
    state_id: i32,
    message: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<HistoryRow> for AppStateHistoryEntry {
    fn from(r: HistoryRow) -> Self {
        AppStateHistoryEntry {
            id: r.id,
            app_id: r.app_id,
            state_id: r.state_id,
            message: r.message,
            created_at: r.created_at,
        }
    }
}

const DEPLOYMENT_COLS: &str = "id, app_id, commit_sha, commit_message, commit_user_name, commit_user_avatar_url, \
     metadata_status, metadata_started_at, metadata_ended_at, metadata_failure_reason, \
     migrations_status, migrations_started_at, migrations_ended_at, migrations_failure_reason, \
     functions_status, functions_started_at, functions_ended_at, functions_failure_reason, \
     deployment_status, deployment_started_at, deployment_ended_at, deployment_failure_reason, \
     created_at";

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: Uuid,
    app_id: Uuid,
    commit_sha: String,
    commit_message: Option<String>,
    commit_user_name: Option<String>,
    commit_user_avatar_url: Option<String>,
    metadata_status: String,
    metadata_started_at: Option<DateTime<Utc>>,
    metadata_ended_at: Option<DateTime<Utc>>,
    metadata_failure_reason: Option<String>,
    migrations_status: String,
    migrations_started_at: Option<DateTime<Utc>>,
    migrations_ended_at: Option<DateTime<Utc>>,
    migrations_failure_reason: Option<String>,
    functions_status: String,
    functions_started_at: Option<DateTime<Utc>>,
    functions_ended_at: Option<DateTime<Utc>>,
    functions_failure_reason: Option<String>,
    deployment_status: String,
    deployment_started_at: Option<DateTime<Utc>>,
    deployment_ended_at: Option<DateTime<Utc>>,
    deployment_failure_reason: Option<String>,
    created_at: DateTime<Utc>,
}

fn stage_record(
    status: &str,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
) -> StageRecord {
    StageRecord {
        status: StageStatus::parse(status).unwrap_or_default(),
        started_at,
        ended_at,
        failure_reason,
    }
}

impl From<DeploymentRow> for Deployment {
    fn from(r: DeploymentRow) -> Self {
        Deployment {
            id: r.id,
            app_id: r.app_id,
            commit: CommitInfo {
                sha: r.commit_sha,
                message: r.commit_message,
                user_name: r.commit_user_name,
                user_avatar_url: r.commit_user_avatar_url,
            },
            stages: Stages {
                metadata: stage_record(
                    &r.metadata_status,
                    r.metadata_started_at,
                    r.metadata_ended_at,
                    r.metadata_failure_reason,
                ),
                migrations: stage_record(
                    &r.migrations_status,
                    r.migrations_started_at,
                    r.migrations_ended_at,
                    r.migrations_failure_reason,
                ),
                functions: stage_record(
                    &r.functions_status,
                    r.functions_started_at,
                    r.functions_ended_at,
                    r.functions_failure_reason,
                ),
                deployment: stage_record(
                    &r.deployment_status,
                    r.deployment_started_at,
                    r.deployment_ended_at,
                    r.deployment_failure_reason,
                ),
            },
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BackupRow {
    id: Uuid,
    app_id: Uuid,
    size: i64,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl From<BackupRow> for Backup {
    fn from(r: BackupRow) -> Self {
        Backup {
            id: r.id,
            app_id: r.app_id,
            size: r.size,
            created_at: r.created_at,
            completed_at: r.completed_at,
            error: r.error,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RestoreJobRow {
    id: Uuid,
    app_id: Uuid,
    backup_id: Uuid,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RestoreJobRow> for RestoreJob {
    fn from(r: RestoreJobRow) -> Self {
        RestoreJob {
            id: r.id,
            app_id: r.app_id,
            backup_id: r.backup_id,
            status: RestoreJobStatus::parse(&r.status).unwrap_or(RestoreJobStatus::Failed),
            error: r.error,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn map_unique_violation(err: sqlx::Error, kind: &'static str, name: &str) -> Error {
    if let sqlx::Error::Database(ref db) = err {
        if db.code().as_deref() == Some("23505") {
            return Error::AlreadyExists { kind, name: name.to_string() };
        }
    }
    Error::Store(err)
}

#[async_trait]
impl Store for PgStore {
    async fn insert_app(&self, new: NewApp) -> Result<Application> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, AppRow>(&format!(
            "INSERT INTO apps (name, workspace_id, region, plan, desired_state) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {APP_COLS}"
        ))
        .bind(&new.name)
        .bind(new.workspace_id)
        .bind(&new.region)
        .bind(&new.plan)
        .bind(LifecycleState::Uninitialized.code())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "application", &new.name))?;
        sqlx::query(
            "INSERT INTO app_state_history (app_id, state_id, message) VALUES ($1, $2, $3)",
        )
        .bind(row.id)
        .bind(LifecycleState::Uninitialized.code())
        .bind("application created")
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn get_app(&self, id: Uuid) -> Result<Option<Application>> {
        let row = sqlx::query_as::<_, AppRow>(&format!("SELECT {APP_COLS} FROM apps WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn find_app_by_name(&self, name: &str) -> Result<Option<Application>> {
        let row =
            sqlx::query_as::<_, AppRow>(&format!("SELECT {APP_COLS} FROM apps WHERE name = $1"))
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn list_apps(&self) -> Result<Vec<Application>> {
        let rows = sqlx::query_as::<_, AppRow>(&format!(
            "SELECT {APP_COLS} FROM apps ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn record_transition(
        &self,
        app_id: Uuid,
        state: LifecycleState,
        message: Option<String>,
    ) -> Result<AppStateHistoryEntry> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE apps SET desired_state = $2, paused = $3, \
             is_provisioned = is_provisioned OR $4, updated_at = now() WHERE id = $1",
        )
        .bind(app_id)
        .bind(state.code())
        .bind(state == LifecycleState::Paused)
        .bind(state == LifecycleState::Live)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::not_found("application", app_id));
        }
        let row = sqlx::query_as::<_, HistoryRow>(
            "INSERT INTO app_state_history (app_id, state_id, message) VALUES ($1, $2, $3) \
             RETURNING id, app_id, state_id, message, created_at",
        )
        .bind(app_id)
        .bind(state.code())
        .bind(message)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn latest_history(&self, app_id: Uuid) -> Result<Option<AppStateHistoryEntry>> {
        let row = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, app_id, state_id, message, created_at FROM app_state_history \
             WHERE app_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn history(&self, app_id: Uuid) -> Result<Vec<AppStateHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, app_id, state_id, message, created_at FROM app_state_history \
             WHERE app_id = $1 ORDER BY seq",
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_deployment(&self, app_id: Uuid, commit: CommitInfo) -> Result<Deployment> {
        let row = sqlx::query_as::<_, DeploymentRow>(&format!(
            "INSERT INTO deployments (app_id, commit_sha, commit_message, commit_user_name, commit_user_avatar_url) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {DEPLOYMENT_COLS}"
        ))
        .bind(app_id)
        .bind(&commit.sha)
        .bind(&commit.message)
        .bind(&commit.user_name)
        .bind(&commit.user_avatar_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_deployment(&self, id: Uuid) -> Result<Option<Deployment>> {
        let row = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {DEPLOYMENT_COLS} FROM deployments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_deployments(&self, app_id: Uuid) -> Result<Vec<Deployment>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {DEPLOYMENT_COLS} FROM deployments WHERE app_id = $1 ORDER BY created_at DESC, id"
        ))
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        let s = &deployment.stages;
        let updated = sqlx::query(
            "UPDATE deployments SET \
             metadata_status=$2, metadata_started_at=$3, metadata_ended_at=$4, metadata_failure_reason=$5, \
             migrations_status=$6, migrations_started_at=$7, migrations_ended_at=$8, migrations_failure_reason=$9, \
             functions_status=$10, functions_started_at=$11, functions_ended_at=$12, functions_failure_reason=$13, \
             deployment_status=$14, deployment_started_at=$15, deployment_ended_at=$16, deployment_failure_reason=$17 \
             WHERE id=$1",
        )
        .bind(deployment.id)
        .bind(s.metadata.status.as_str())
        .bind(s.metadata.started_at)
        .bind(s.metadata.ended_at)
        .bind(&s.metadata.failure_reason)
        .bind(s.migrations.status.as_str())
        .bind(s.migrations.started_at)
        .bind(s.migrations.ended_at)
        .bind(&s.migrations.failure_reason)
        .bind(s.functions.status.as_str())
        .bind(s.functions.started_at)
        .bind(s.functions.ended_at)
        .bind(&s.functions.failure_reason)
        .bind(s.deployment.status.as_str())
        .bind(s.deployment.started_at)
        .bind(s.deployment.ended_at)
        .bind(&s.deployment.failure_reason)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::not_found("deployment", deployment.id));
        }
        Ok(())
    }

    async fn append_log(&self, deployment_id: Uuid, message: &str) -> Result<DeploymentLogLine> {
        let row = sqlx::query(
            "INSERT INTO deployment_logs (deployment_id, message) VALUES ($1, $2) \
             RETURNING id, created_at",
        )
        .bind(deployment_id)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;
        Ok(DeploymentLogLine {
            id: row.get("id"),
            deployment_id,
            message: message.to_string(),
            created_at: row.get("created_at"),
        })
    }

    async fn logs(&self, deployment_id: Uuid) -> Result<Vec<DeploymentLogLine>> {
        let rows = sqlx::query(
            "SELECT id, deployment_id, message, created_at FROM deployment_logs \
             WHERE deployment_id = $1 ORDER BY created_at, id",
        )
        .bind(deployment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| DeploymentLogLine {
                id: r.get("id"),
                deployment_id: r.get("deployment_id"),
                message: r.get("message"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn insert_backup(&self, app_id: Uuid) -> Result<Backup> {
        let row = sqlx::query_as::<_, BackupRow>(
            "INSERT INTO backups (app_id) VALUES ($1) \
             RETURNING id, app_id, size, created_at, completed_at, error",
        )
        .bind(app_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_backup(&self, id: Uuid) -> Result<Option<Backup>> {
        let row = sqlx::query_as::<_, BackupRow>(
            "SELECT id, app_id, size, created_at, completed_at, error FROM backups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_backups(&self, app_id: Uuid) -> Result<Vec<Backup>> {
        let rows = sqlx::query_as::<_, BackupRow>(
            "SELECT id, app_id, size, created_at, completed_at, error FROM backups \
             WHERE app_id = $1 ORDER BY created_at DESC, id",
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_backup(&self, backup: &Backup) -> Result<()> {
        let updated =
            sqlx::query("UPDATE backups SET size=$2, completed_at=$3, error=$4 WHERE id=$1")
                .bind(backup.id)
                .bind(backup.size)
                .bind(backup.completed_at)
                .bind(&backup.error)
                .execute(&self.pool)
                .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::not_found("backup", backup.id));
        }
        Ok(())
    }

    async fn list_stale_backups(&self, cutoff: DateTime<Utc>) -> Result<Vec<Backup>> {
        let rows = sqlx::query_as::<_, BackupRow>(
            "SELECT id, app_id, size, created_at, completed_at, error FROM backups \
             WHERE completed_at IS NULL AND created_at < $1 ORDER BY created_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_restore_job(&self, app_id: Uuid, backup_id: Uuid) -> Result<RestoreJob> {
        let row = sqlx::query_as::<_, RestoreJobRow>(
            "INSERT INTO restore_jobs (app_id, backup_id) VALUES ($1, $2) \
             RETURNING id, app_id, backup_id, status, error, created_at, updated_at",
        )
        .bind(app_id)
        .bind(backup_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_restore_job(&self, id: Uuid) -> Result<Option<RestoreJob>> {
        let row = sqlx::query_as::<_, RestoreJobRow>(
            "SELECT id, app_id, backup_id, status, error, created_at, updated_at \
             FROM restore_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn update_restore_job(&self, job: &RestoreJob) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE restore_jobs SET status=$2, error=$3, updated_at=now() WHERE id=$1",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.error)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::not_found("restore job", job.id));
        }
        Ok(())
    }
}
