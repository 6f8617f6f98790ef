use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tower::util::ServiceExt;
use uuid::Uuid;

use control_plane::build_router;
use control_plane::error::Error;
use control_plane::models::{CommitInfo, Stage, StageStatus};
use control_plane::services::pipeline::StageOutcome;
use control_plane::store::Store;
use control_plane::test_support::{harness, live_app, wait_until, TestHarness};

fn commit(sha: &str) -> CommitInfo {
    CommitInfo { sha: sha.to_string(), ..Default::default() }
}

/// Insert a deployment row directly so the internal runner does not race
/// manually reported outcomes.
async fn manual_deployment(h: &TestHarness, app_id: Uuid) -> Uuid {
    h.state.store.insert_deployment(app_id, commit("cafe01")).await.unwrap().id
}

#[tokio::test]
async fn runner_drives_all_stages_to_success() {
    let h = harness();
    let app = live_app(&h.state, "green").await;
    let deployment = h.state.pipeline.start_deployment(app.id, commit("abc123")).await.unwrap();
    assert!(
        wait_until(|| async {
            h.state.pipeline.get_deployment(deployment.id).await.unwrap().is_terminal()
        })
        .await
    );
    let done = h.state.pipeline.get_deployment(deployment.id).await.unwrap();
    for stage in Stage::ALL {
        assert_eq!(done.stages.get(stage).status, StageStatus::Succeeded, "{stage}");
        assert!(done.stages.get(stage).started_at.is_some());
        assert!(done.stages.get(stage).ended_at.is_some());
    }
    let logs = h.state.pipeline.logs(deployment.id).await.unwrap();
    assert!(logs.iter().any(|l| l.message == "deployment succeeded"));
}

#[tokio::test]
async fn migrations_failure_skips_functions_and_fails_deployment() {
    let h = harness();
    h.executor.fail_stage(Stage::Migrations, "syntax error at line 3");
    let app = live_app(&h.state, "red").await;
    let deployment = h.state.pipeline.start_deployment(app.id, commit("def456")).await.unwrap();
    // The umbrella can fail while metadata is still in flight; wait for both.
    assert!(
        wait_until(|| async {
            let d = h.state.pipeline.get_deployment(deployment.id).await.unwrap();
            d.is_terminal() && d.stages.metadata.status.is_terminal()
        })
        .await
    );
    let done = h.state.pipeline.get_deployment(deployment.id).await.unwrap();
    assert_eq!(done.stages.metadata.status, StageStatus::Succeeded);
    assert_eq!(done.stages.migrations.status, StageStatus::Failed);
    assert_eq!(done.stages.migrations.failure_reason.as_deref(), Some("syntax error at line 3"));
    assert_eq!(done.stages.functions.status, StageStatus::Skipped);
    assert!(done.stages.functions.started_at.is_none());
    assert_eq!(done.stages.deployment.status, StageStatus::Failed);
    assert_eq!(done.stages.deployment.failure_reason.as_deref(), Some("syntax error at line 3"));

    let logs = h.state.pipeline.logs(deployment.id).await.unwrap();
    assert!(logs.iter().any(|l| l.message == "stage functions skipped"));
    assert!(logs.iter().any(|l| l.message == "deployment failed: syntax error at line 3"));
}

#[tokio::test]
async fn repeated_identical_outcome_is_a_noop() {
    let h = harness();
    let app = live_app(&h.state, "idem").await;
    let id = manual_deployment(&h, app.id).await;
    h.state.pipeline.advance_stage(id, Stage::Metadata, StageOutcome::Started).await.unwrap();
    let first = h
        .state
        .pipeline
        .advance_stage(id, Stage::Metadata, StageOutcome::Failed("disk full".into()))
        .await
        .unwrap();
    let logs_before = h.state.pipeline.logs(id).await.unwrap().len();
    let second = h
        .state
        .pipeline
        .advance_stage(id, Stage::Metadata, StageOutcome::Failed("disk full".into()))
        .await
        .unwrap();
    assert_eq!(second.stages.metadata.status, StageStatus::Failed);
    assert_eq!(
        second.stages.metadata.ended_at,
        first.stages.metadata.ended_at
    );
    assert_eq!(h.state.pipeline.logs(id).await.unwrap().len(), logs_before);
}

#[tokio::test]
async fn conflicting_outcome_is_rejected_and_recorded_wins() {
    let h = harness();
    let app = live_app(&h.state, "conflict").await;
    let id = manual_deployment(&h, app.id).await;
    h.state.pipeline.advance_stage(id, Stage::Metadata, StageOutcome::Started).await.unwrap();
    h.state.pipeline.advance_stage(id, Stage::Metadata, StageOutcome::Succeeded).await.unwrap();
    let err = h
        .state
        .pipeline
        .advance_stage(id, Stage::Metadata, StageOutcome::Failed("late failure".into()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ConflictingStageOutcome {
            stage: Stage::Metadata,
            recorded: StageStatus::Succeeded,
            requested: StageStatus::Failed,
        }
    ));
    let deployment = h.state.pipeline.get_deployment(id).await.unwrap();
    assert_eq!(deployment.stages.metadata.status, StageStatus::Succeeded);
    assert!(deployment.stages.metadata.failure_reason.is_none());
}

#[tokio::test]
async fn failure_reason_is_the_earliest_ended_failure() {
    let h = harness();
    let app = live_app(&h.state, "tiebreak").await;
    let id = manual_deployment(&h, app.id).await;
    // Both stages in progress before either fails, so neither is skipped.
    h.state.pipeline.advance_stage(id, Stage::Metadata, StageOutcome::Started).await.unwrap();
    h.state.pipeline.advance_stage(id, Stage::Migrations, StageOutcome::Started).await.unwrap();
    h.state
        .pipeline
        .advance_stage(id, Stage::Migrations, StageOutcome::Failed("migration timeout".into()))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    h.state
        .pipeline
        .advance_stage(id, Stage::Metadata, StageOutcome::Failed("metadata mismatch".into()))
        .await
        .unwrap();
    let deployment = h.state.pipeline.get_deployment(id).await.unwrap();
    assert_eq!(deployment.stages.deployment.status, StageStatus::Failed);
    // Recomputed after the second failure and still the earliest one.
    assert_eq!(
        deployment.stages.deployment.failure_reason.as_deref(),
        Some("migration timeout")
    );
}

#[tokio::test]
async fn umbrella_stage_cannot_be_advanced_via_api() {
    let h = harness();
    let app = live_app(&h.state, "api").await;
    let id = manual_deployment(&h, app.id).await;
    let body = serde_json::json!({"outcome": "succeeded"}).to_string();
    let req = Request::builder()
        .method("POST")
        .uri(format!("/deployments/{id}/stages/deployment"))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let res = build_router(h.state.clone()).oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deployment_requires_live_app() {
    let h = harness();
    let app = live_app(&h.state, "pausedapp").await;
    h.state.lifecycle.pause_app(app.id, "paused by user").await.unwrap();
    let err = h.state.pipeline.start_deployment(app.id, commit("beef99")).await.unwrap_err();
    assert!(matches!(err, Error::AppNotLive { .. }));
    assert!(h.state.pipeline.list_for_app(app.id).await.unwrap().is_empty());
}
