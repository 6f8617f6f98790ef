use chrono::Duration;

use control_plane::error::Error;
use control_plane::models::RestoreJobStatus;
use control_plane::state::LifecycleState;
use control_plane::test_support::{harness, harness_with, live_app, wait_until};
use control_plane::ServiceSettings;

#[tokio::test]
async fn backup_starts_pending_and_completes_once() {
    let h = harness();
    let app = live_app(&h.state, "vault").await;
    let backup = h.state.backups.create_backup(app.id).await.unwrap();
    assert!(backup.completed_at.is_none());
    assert_eq!(backup.size, 0);
    assert!(backup.error.is_none());

    let done = h.state.backups.complete_backup(backup.id, 1024).await.unwrap();
    assert_eq!(done.size, 1024);
    assert!(done.completed_at.is_some());
    assert!(done.completed_at.unwrap() >= done.created_at);

    // Worker retry with a different size is ignored.
    let again = h.state.backups.complete_backup(backup.id, 9999).await.unwrap();
    assert_eq!(again.size, 1024);
    assert_eq!(again.completed_at, done.completed_at);
}

#[tokio::test]
async fn backup_requires_live_app() {
    let h = harness();
    let app = h
        .state
        .lifecycle
        .create_app("cold", uuid::Uuid::new_v4(), "eu-central-1", "starter")
        .await
        .unwrap();
    let err = h.state.backups.create_backup(app.id).await.unwrap_err();
    assert!(matches!(err, Error::AppNotLive { actual: LifecycleState::Uninitialized }));
}

#[tokio::test]
async fn failed_hand_off_is_annotated_on_the_row() {
    let h = harness();
    let app = live_app(&h.state, "flaky-s3").await;
    h.snapshots.fail_next_create("object store unavailable").await;
    let err = h.state.backups.create_backup(app.id).await.unwrap_err();
    assert!(matches!(err, Error::ExternalFailure(_)));
    let backups = h.state.backups.list_backups(app.id).await.unwrap();
    assert_eq!(backups.len(), 1);
    assert!(backups[0].completed_at.is_none());
    assert!(backups[0].error.as_deref().unwrap().contains("object store unavailable"));
}

#[tokio::test]
async fn fleet_backup_collects_per_app_failures() {
    let h = harness();
    let a = live_app(&h.state, "fleet-a").await;
    let b = live_app(&h.state, "fleet-b").await;
    let c = live_app(&h.state, "fleet-c").await;
    h.state.lifecycle.pause_app(c.id, "paused by user").await.unwrap();

    let report = h.state.backups.schedule_backup_all().await.unwrap();
    assert_eq!(report.backup_ids.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].app_id, c.id);
    assert!(report.failures[0].error.contains("not live"));

    for app_id in [a.id, b.id] {
        assert_eq!(h.state.backups.list_backups(app_id).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn restore_validates_ownership_and_completeness() {
    let h = harness();
    let owner = live_app(&h.state, "owner").await;
    let other = live_app(&h.state, "other").await;
    let backup = h.state.backups.create_backup(owner.id).await.unwrap();

    // Foreign backup ids are indistinguishable from unknown ones.
    let err = h.state.backups.restore_backup(other.id, backup.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    // Still pending, so not restorable.
    let err = h.state.backups.restore_backup(owner.id, backup.id).await.unwrap_err();
    assert!(matches!(err, Error::BackupIncomplete(id) if id == backup.id));

    h.state.backups.complete_backup(backup.id, 512).await.unwrap();
    h.state.lifecycle.pause_app(owner.id, "paused by user").await.unwrap();
    let err = h.state.backups.restore_backup(owner.id, backup.id).await.unwrap_err();
    assert!(matches!(err, Error::AppNotLive { .. }));
}

#[tokio::test]
async fn restore_passes_through_updating_and_back_to_live() {
    let h = harness();
    let app = live_app(&h.state, "restore-ok").await;
    let backup = h.state.backups.create_backup(app.id).await.unwrap();
    h.state.backups.complete_backup(backup.id, 2048).await.unwrap();

    h.state.backups.restore_backup(app.id, backup.id).await.unwrap();
    let states: Vec<_> = h
        .state
        .lifecycle
        .history(app.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.state().unwrap())
        .collect();
    let tail = &states[states.len() - 2..];
    assert_eq!(tail, [LifecycleState::Updating, LifecycleState::Live]);
}

#[tokio::test]
async fn failed_restore_lands_app_in_errored() {
    let h = harness();
    let app = live_app(&h.state, "restore-bad").await;
    let backup = h.state.backups.create_backup(app.id).await.unwrap();
    h.state.backups.complete_backup(backup.id, 2048).await.unwrap();

    h.snapshots.fail_next_restore("checksum mismatch").await;
    let err = h.state.backups.restore_backup(app.id, backup.id).await.unwrap_err();
    assert!(matches!(err, Error::ExternalFailure(_)));
    assert_eq!(
        h.state.lifecycle.current_state(app.id).await.unwrap(),
        LifecycleState::Errored
    );
    let history = h.state.lifecycle.history(app.id).await.unwrap();
    assert!(history.last().unwrap().message.as_deref().unwrap().contains("checksum mismatch"));
}

#[tokio::test]
async fn scheduled_restore_runs_to_success() {
    let h = harness();
    let app = live_app(&h.state, "async-restore").await;
    let backup = h.state.backups.create_backup(app.id).await.unwrap();
    h.state.backups.complete_backup(backup.id, 4096).await.unwrap();

    let job = h.state.backups.schedule_restore_backup(app.id, backup.id).await.unwrap();
    assert_eq!(job.status, RestoreJobStatus::Queued);
    assert!(
        wait_until(|| async {
            let j = h.state.backups.get_restore_job(job.id).await.unwrap();
            j.status == RestoreJobStatus::Succeeded
        })
        .await
    );
    assert_eq!(
        h.state.lifecycle.current_state(app.id).await.unwrap(),
        LifecycleState::Live
    );
}

#[tokio::test]
async fn scheduled_restore_records_validation_failure_on_the_job() {
    let h = harness();
    let app = live_app(&h.state, "async-restore-bad").await;
    let backup = h.state.backups.create_backup(app.id).await.unwrap();
    // Never completed; the job must fail at run time, not at enqueue time.
    let job = h.state.backups.schedule_restore_backup(app.id, backup.id).await.unwrap();
    assert!(
        wait_until(|| async {
            let j = h.state.backups.get_restore_job(job.id).await.unwrap();
            j.status == RestoreJobStatus::Failed
        })
        .await
    );
    let job = h.state.backups.get_restore_job(job.id).await.unwrap();
    assert!(job.error.as_deref().unwrap().contains("has not completed"));
}

#[tokio::test]
async fn stale_sweep_surfaces_only_old_pending_backups() {
    let settings = ServiceSettings { backup_staleness: Duration::zero(), ..Default::default() };
    let h = harness_with(settings);
    let app = live_app(&h.state, "stale").await;
    let pending = h.state.backups.create_backup(app.id).await.unwrap();
    let completed = h.state.backups.create_backup(app.id).await.unwrap();
    h.state.backups.complete_backup(completed.id, 100).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let stale = h.state.backups.stale_backups().await.unwrap();
    let ids: Vec<_> = stale.iter().map(|b| b.id).collect();
    assert!(ids.contains(&pending.id));
    assert!(!ids.contains(&completed.id));
}
