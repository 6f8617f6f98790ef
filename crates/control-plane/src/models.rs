use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::LifecycleState;

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct Application {
    pub id: Uuid,
    pub name: String,
    pub workspace_id: Uuid,
    pub region: String,
    pub plan: String,
    /// Read-optimized cache of the latest history row's state code.
    /// Only ever written in the same transaction as the history append.
    pub desired_state: i32,
    pub paused: bool,
    pub is_provisioned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn desired(&self) -> Option<LifecycleState> {
        LifecycleState::from_code(self.desired_state)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct AppStateHistoryEntry {
    pub id: Uuid,
    pub app_id: Uuid,
    pub state_id: i32,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AppStateHistoryEntry {
    pub fn state(&self) -> Option<LifecycleState> {
        LifecycleState::from_code(self.state_id)
    }
}

/// The four independently timed phases of one deployment. `Deployment` is
/// the umbrella phase resolved by the pipeline, never advanced by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Metadata,
    Migrations,
    Functions,
    Deployment,
}

impl Stage {
    pub const ALL: [Stage; 4] =
        [Self::Metadata, Self::Migrations, Self::Functions, Self::Deployment];

    pub fn name(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Migrations => "migrations",
            Self::Functions => "functions",
            Self::Deployment => "deployment",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    NotStarted,
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Not yet picked up by a worker; eligible for fail-fast skipping.
    pub fn is_unstarted(self) -> bool {
        matches!(self, Self::NotStarted | Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
pub struct StageRecord {
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// One record per stage, keyed by [`Stage`]. Replaces the flat per-stage
/// column bundle so skip/fail-fast logic is written once.
#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
pub struct Stages {
    pub metadata: StageRecord,
    pub migrations: StageRecord,
    pub functions: StageRecord,
    pub deployment: StageRecord,
}

impl Stages {
    pub fn get(&self, stage: Stage) -> &StageRecord {
        match stage {
            Stage::Metadata => &self.metadata,
            Stage::Migrations => &self.migrations,
            Stage::Functions => &self.functions,
            Stage::Deployment => &self.deployment,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut StageRecord {
        match stage {
            Stage::Metadata => &mut self.metadata,
            Stage::Migrations => &mut self.migrations,
            Stage::Functions => &mut self.functions,
            Stage::Deployment => &mut self.deployment,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
pub struct CommitInfo {
    pub sha: String,
    pub message: Option<String>,
    pub user_name: Option<String>,
    pub user_avatar_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct Deployment {
    pub id: Uuid,
    pub app_id: Uuid,
    pub commit: CommitInfo,
    pub stages: Stages,
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// Terminal once the umbrella stage has a terminal status; the row is
    /// immutable from then on (kept for audit).
    pub fn is_terminal(&self) -> bool {
        self.stages.deployment.status.is_terminal()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct DeploymentLogLine {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct Backup {
    pub id: Uuid,
    pub app_id: Uuid,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    /// None while the snapshot is in flight; stale-if-old is surfaced by the
    /// scheduler, never auto-retried.
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Backup {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RestoreJobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RestoreJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Tracking record for a scheduled restore; polled by the dashboard instead
/// of assuming the caller "just knows" when the job finished.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct RestoreJob {
    pub id: Uuid,
    pub app_id: Uuid,
    pub backup_id: Uuid,
    pub status: RestoreJobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct BulkBackupFailure {
    pub app_id: Uuid,
    pub error: String,
}

/// Outcome of a fleet-wide backup run; best effort, never transactional.
#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
pub struct BulkBackupReport {
    pub backup_ids: Vec<Uuid>,
    pub failures: Vec<BulkBackupFailure>,
}
