//! Four-stage deployment pipeline for one commit against one app.
//!
//! `metadata` and `migrations` run concurrently once the app is live;
//! `functions` only after `migrations` succeeded; the umbrella `deployment`
//! stage is resolved by the pipeline itself and never advanced by callers.
//! A failed stage is terminal within a deployment: retrying means starting
//! a new deployment.
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::external::StageExecutor;
use crate::models::{CommitInfo, Deployment, DeploymentLogLine, Stage, StageStatus};
use crate::services::lifecycle::LifecycleController;
use crate::store::Store;
use crate::telemetry::DEPLOYMENTS_TOTAL;

/// Outcome reported for a stage, by the internal runner or by an external
/// worker through the API.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Started,
    Succeeded,
    Failed(String),
}

pub struct DeploymentPipeline {
    store: Arc<dyn Store>,
    lifecycle: Arc<LifecycleController>,
    executor: Arc<dyn StageExecutor>,
    // Serializes stage advances per deployment; app-level ordering is the
    // lifecycle controller's concern.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl DeploymentPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        lifecycle: Arc<LifecycleController>,
        executor: Arc<dyn StageExecutor>,
    ) -> Self {
        Self { store, lifecycle, executor, locks: DashMap::new() }
    }

    fn deployment_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Create the deployment record and return immediately; the stages run
    /// on a spawned task and are observed via [`Self::get_deployment`].
    pub async fn start_deployment(
        self: &Arc<Self>,
        app_id: Uuid,
        commit: CommitInfo,
    ) -> Result<Deployment> {
        self.lifecycle.ensure_live(app_id).await?;
        let deployment = self.store.insert_deployment(app_id, commit.clone()).await?;
        self.store
            .append_log(
                deployment.id,
                &format!("deployment created for commit {}", commit.sha),
            )
            .await?;
        tracing::info!(deployment_id = %deployment.id, %app_id, commit_sha = %commit.sha, "deployment created");
        let pipeline = Arc::clone(self);
        let deployment_id = deployment.id;
        tokio::spawn(async move {
            pipeline.run(deployment_id, app_id, commit.sha).await;
        });
        Ok(deployment)
    }

    async fn run(&self, deployment_id: Uuid, app_id: Uuid, commit_sha: String) {
        if let Err(e) = self.begin(deployment_id).await {
            tracing::error!(%deployment_id, error = %e, "pipeline failed to begin");
            return;
        }
        tokio::join!(
            self.run_stage(deployment_id, app_id, &commit_sha, Stage::Metadata),
            self.run_stage(deployment_id, app_id, &commit_sha, Stage::Migrations),
        );
        let deployment = match self.store.get_deployment(deployment_id).await {
            Ok(Some(d)) => d,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(%deployment_id, error = %e, "pipeline lost its deployment row");
                return;
            }
        };
        // Functions depend on migrations having succeeded (they may reference
        // new tables/columns); a migrations failure already skipped them.
        if deployment.stages.migrations.status == StageStatus::Succeeded
            && deployment.stages.functions.status.is_unstarted()
        {
            self.run_stage(deployment_id, app_id, &commit_sha, Stage::Functions).await;
        }
    }

    async fn run_stage(&self, deployment_id: Uuid, app_id: Uuid, commit_sha: &str, stage: Stage) {
        if let Err(e) = self.advance_stage(deployment_id, stage, StageOutcome::Started).await {
            tracing::warn!(%deployment_id, %stage, error = %e, "stage not started");
            return;
        }
        let outcome = match self.executor.execute(app_id, commit_sha, stage).await {
            Ok(()) => StageOutcome::Succeeded,
            Err(e) => StageOutcome::Failed(e.to_string()),
        };
        if let Err(e) = self.advance_stage(deployment_id, stage, outcome).await {
            tracing::error!(%deployment_id, %stage, error = %e, "stage outcome not recorded");
        }
    }

    /// Mark the umbrella in-progress and queue the two entry stages.
    async fn begin(&self, deployment_id: Uuid) -> Result<()> {
        let lock = self.deployment_lock(deployment_id);
        let _guard = lock.lock().await;
        let mut deployment = self
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| Error::not_found("deployment", deployment_id))?;
        // An externally reported failure may have resolved the deployment
        // before the runner's first poll; never reopen a terminal umbrella.
        if deployment.is_terminal() {
            return Ok(());
        }
        let now = Utc::now();
        let umbrella = deployment.stages.get_mut(Stage::Deployment);
        umbrella.status = StageStatus::InProgress;
        umbrella.started_at.get_or_insert(now);
        for stage in [Stage::Metadata, Stage::Migrations] {
            let record = deployment.stages.get_mut(stage);
            if record.status == StageStatus::NotStarted {
                record.status = StageStatus::Pending;
            }
        }
        self.store.update_deployment(&deployment).await?;
        self.store.append_log(deployment_id, "pipeline started").await?;
        Ok(())
    }

    /// Record a stage outcome. Idempotent for a repeated identical terminal
    /// outcome (no state change, no duplicate log lines); a different
    /// terminal outcome is a `ConflictingStageOutcome` and the earlier
    /// recorded one wins.
    pub async fn advance_stage(
        &self,
        deployment_id: Uuid,
        stage: Stage,
        outcome: StageOutcome,
    ) -> Result<Deployment> {
        let lock = self.deployment_lock(deployment_id);
        let _guard = lock.lock().await;
        let mut deployment = self
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| Error::not_found("deployment", deployment_id))?;
        let now = Utc::now();
        let mut lines: Vec<String> = Vec::new();
        let record = deployment.stages.get_mut(stage);
        match outcome {
            StageOutcome::Started => {
                if record.status == StageStatus::InProgress {
                    return Ok(deployment);
                }
                if record.status.is_terminal() {
                    return Err(conflict(stage, record.status, StageStatus::InProgress));
                }
                record.status = StageStatus::InProgress;
                record.started_at.get_or_insert(now);
                lines.push(format!("stage {stage} started"));
            }
            StageOutcome::Succeeded => {
                if record.status == StageStatus::Succeeded {
                    return Ok(deployment);
                }
                if record.status.is_terminal() {
                    return Err(conflict(stage, record.status, StageStatus::Succeeded));
                }
                record.started_at.get_or_insert(now);
                record.status = StageStatus::Succeeded;
                record.ended_at = Some(now);
                lines.push(format!("stage {stage} succeeded"));
            }
            StageOutcome::Failed(reason) => {
                if record.status == StageStatus::Failed {
                    return Ok(deployment);
                }
                if record.status.is_terminal() {
                    return Err(conflict(stage, record.status, StageStatus::Failed));
                }
                record.started_at.get_or_insert(now);
                record.status = StageStatus::Failed;
                record.ended_at = Some(now);
                lines.push(format!("stage {stage} failed: {reason}"));
                record.failure_reason = Some(reason);
            }
        }
        if deployment.stages.get(stage).status.is_terminal() {
            resolve(&mut deployment, &mut lines);
        }
        self.store.update_deployment(&deployment).await?;
        for line in &lines {
            self.store.append_log(deployment_id, line).await?;
        }
        Ok(deployment)
    }

    pub async fn get_deployment(&self, deployment_id: Uuid) -> Result<Deployment> {
        self.store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| Error::not_found("deployment", deployment_id))
    }

    pub async fn list_for_app(&self, app_id: Uuid) -> Result<Vec<Deployment>> {
        self.store.list_deployments(app_id).await
    }

    pub async fn logs(&self, deployment_id: Uuid) -> Result<Vec<DeploymentLogLine>> {
        self.get_deployment(deployment_id).await?;
        self.store.logs(deployment_id).await
    }
}

fn conflict(stage: Stage, recorded: StageStatus, requested: StageStatus) -> Error {
    tracing::error!(%stage, ?recorded, ?requested, "conflicting stage outcome reported");
    Error::ConflictingStageOutcome { stage, recorded, requested }
}

const WORK_STAGES: [Stage; 3] = [Stage::Metadata, Stage::Migrations, Stage::Functions];

/// Stage-generic resolution, run after every terminal outcome: fail-fast
/// skipping of unstarted stages, umbrella success/failure, and the
/// deterministic failure-reason tie-break (earliest `ended_at`, then stage
/// declaration order). The umbrella only goes terminal once every work
/// stage is terminal; an in-flight sibling keeps it open and its own
/// terminal outcome re-runs resolution.
fn resolve(deployment: &mut Deployment, lines: &mut Vec<String>) {
    let now = Utc::now();
    let any_failed = WORK_STAGES
        .iter()
        .any(|&s| deployment.stages.get(s).status == StageStatus::Failed);
    if any_failed {
        for stage in WORK_STAGES {
            let record = deployment.stages.get_mut(stage);
            if record.status.is_unstarted() {
                record.status = StageStatus::Skipped;
                lines.push(format!("stage {stage} skipped"));
            }
        }
        if WORK_STAGES
            .iter()
            .any(|&s| !deployment.stages.get(s).status.is_terminal())
        {
            return;
        }
        let reason = WORK_STAGES
            .iter()
            .filter(|&&s| deployment.stages.get(s).status == StageStatus::Failed)
            .min_by_key(|&&s| deployment.stages.get(s).ended_at)
            .and_then(|&s| deployment.stages.get(s).failure_reason.clone());
        let umbrella = deployment.stages.get_mut(Stage::Deployment);
        if !umbrella.status.is_terminal() {
            umbrella.status = StageStatus::Failed;
            umbrella.started_at.get_or_insert(now);
            umbrella.ended_at = Some(now);
            lines.push(format!(
                "deployment failed: {}",
                reason.as_deref().unwrap_or("stage failure")
            ));
            DEPLOYMENTS_TOTAL.with_label_values(&["failed"]).inc();
        }
        umbrella.failure_reason = reason;
        return;
    }
    let all_succeeded = WORK_STAGES
        .iter()
        .all(|&s| deployment.stages.get(s).status == StageStatus::Succeeded);
    if all_succeeded {
        let umbrella = deployment.stages.get_mut(Stage::Deployment);
        if !umbrella.status.is_terminal() {
            umbrella.status = StageStatus::Succeeded;
            umbrella.started_at.get_or_insert(now);
            umbrella.ended_at = Some(now);
            lines.push("deployment succeeded".into());
            DEPLOYMENTS_TOTAL.with_label_values(&["succeeded"]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, live_app};

    fn umbrella_terminal_iff_stages_terminal(deployment: &Deployment) {
        let all_terminal = WORK_STAGES
            .iter()
            .all(|&s| deployment.stages.get(s).status.is_terminal());
        assert_eq!(
            deployment.is_terminal(),
            all_terminal,
            "umbrella {:?} disagrees with work stages",
            deployment.stages.deployment.status
        );
    }

    async fn deployment_for(h: &crate::test_support::TestHarness, name: &str) -> Uuid {
        let app = live_app(&h.state, name).await;
        let commit = CommitInfo { sha: "cafe01".into(), ..Default::default() };
        h.state.store.insert_deployment(app.id, commit).await.unwrap().id
    }

    #[tokio::test]
    async fn umbrella_stays_open_while_a_sibling_is_in_progress() {
        let h = harness();
        let id = deployment_for(&h, "sibling").await;
        let p = &h.state.pipeline;
        p.advance_stage(id, Stage::Metadata, StageOutcome::Started).await.unwrap();
        p.advance_stage(id, Stage::Migrations, StageOutcome::Started).await.unwrap();
        let d = p
            .advance_stage(id, Stage::Migrations, StageOutcome::Failed("bad sql".into()))
            .await
            .unwrap();
        // Functions is skipped right away, but metadata is still running.
        assert_eq!(d.stages.functions.status, StageStatus::Skipped);
        assert_eq!(d.stages.metadata.status, StageStatus::InProgress);
        assert!(!d.is_terminal());
        umbrella_terminal_iff_stages_terminal(&d);

        let d = p.advance_stage(id, Stage::Metadata, StageOutcome::Succeeded).await.unwrap();
        assert_eq!(d.stages.deployment.status, StageStatus::Failed);
        assert_eq!(d.stages.deployment.failure_reason.as_deref(), Some("bad sql"));
        umbrella_terminal_iff_stages_terminal(&d);
    }

    #[tokio::test]
    async fn begin_never_reopens_a_resolved_deployment() {
        let h = harness();
        let id = deployment_for(&h, "preempted").await;
        let p = &h.state.pipeline;
        // A worker reports the failure before the runner's first poll; with
        // no stage started, resolution closes the deployment immediately.
        let d = p
            .advance_stage(id, Stage::Migrations, StageOutcome::Failed("boom".into()))
            .await
            .unwrap();
        assert_eq!(d.stages.deployment.status, StageStatus::Failed);
        assert_eq!(d.stages.metadata.status, StageStatus::Skipped);
        let logs_before = p.logs(id).await.unwrap().len();

        p.begin(id).await.unwrap();
        let d = p.get_deployment(id).await.unwrap();
        assert_eq!(d.stages.deployment.status, StageStatus::Failed);
        assert_eq!(d.stages.metadata.status, StageStatus::Skipped);
        assert_eq!(p.logs(id).await.unwrap().len(), logs_before);
    }
}
