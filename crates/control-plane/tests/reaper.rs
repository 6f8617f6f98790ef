use chrono::{Duration, Utc};
use uuid::Uuid;

use control_plane::state::LifecycleState;
use control_plane::test_support::{harness_with, live_app, TestHarness};
use control_plane::ServiceSettings;

fn reaper_harness(max_per_run: usize) -> TestHarness {
    harness_with(ServiceSettings {
        inactive_threshold: Duration::days(7),
        reaper_max_per_run: max_per_run,
        ..Default::default()
    })
}

#[tokio::test]
async fn pauses_oldest_inactive_first_up_to_the_cap() {
    let h = reaper_harness(5);
    let mut apps: Vec<Uuid> = Vec::new();
    for i in 0..10i64 {
        let app = live_app(&h.state, &format!("idle-{i}")).await;
        // idle-0 is the longest idle, idle-9 the most recent.
        h.activity.set_last_seen(app.id, Utc::now() - Duration::days(8) - Duration::minutes(10 - i));
        apps.push(app.id);
    }

    let paused = h.state.reaper.pause_inactive_apps(5).await.unwrap();
    assert_eq!(paused, apps[..5].to_vec());
    for (i, app_id) in apps.iter().enumerate() {
        let state = h.state.lifecycle.current_state(*app_id).await.unwrap();
        if i < 5 {
            assert_eq!(state, LifecycleState::Paused, "idle-{i}");
        } else {
            assert_eq!(state, LifecycleState::Live, "idle-{i}");
        }
    }
}

#[tokio::test]
async fn never_seen_and_recently_active_apps_are_not_inactive() {
    let h = reaper_harness(10);
    let never_seen = live_app(&h.state, "fresh").await;
    let active = live_app(&h.state, "busy").await;
    h.activity.touch(active.id);
    let idle = live_app(&h.state, "dormant").await;
    h.activity.set_last_seen(idle.id, Utc::now() - Duration::days(30));

    let inactive = h.state.reaper.list_inactive_apps(Duration::days(7)).await.unwrap();
    assert_eq!(inactive, vec![idle.id]);

    let paused = h.state.reaper.pause_inactive_apps(10).await.unwrap();
    assert_eq!(paused, vec![idle.id]);
    assert_eq!(
        h.state.lifecycle.current_state(never_seen.id).await.unwrap(),
        LifecycleState::Live
    );
    assert_eq!(
        h.state.lifecycle.current_state(active.id).await.unwrap(),
        LifecycleState::Live
    );
}

#[tokio::test]
async fn rejected_pause_is_skipped_not_fatal() {
    let h = reaper_harness(10);
    let already_paused = live_app(&h.state, "napping").await;
    h.state.lifecycle.pause_app(already_paused.id, "paused by user").await.unwrap();
    h.activity.set_last_seen(already_paused.id, Utc::now() - Duration::days(30));
    let idle = live_app(&h.state, "overdue").await;
    h.activity.set_last_seen(idle.id, Utc::now() - Duration::days(20));

    let paused = h.state.reaper.pause_inactive_apps(10).await.unwrap();
    assert_eq!(paused, vec![idle.id]);
    assert_eq!(
        h.state.lifecycle.current_state(already_paused.id).await.unwrap(),
        LifecycleState::Paused
    );
}

#[tokio::test]
async fn threshold_boundary_uses_strictly_older_than() {
    let h = reaper_harness(10);
    let app = live_app(&h.state, "edge").await;
    h.activity.set_last_seen(app.id, Utc::now() - Duration::days(6));
    assert!(h.state.reaper.list_inactive_apps(Duration::days(7)).await.unwrap().is_empty());
    h.activity.set_last_seen(app.id, Utc::now() - Duration::days(7) - Duration::seconds(1));
    assert_eq!(
        h.state.reaper.list_inactive_apps(Duration::days(7)).await.unwrap(),
        vec![app.id]
    );
}
