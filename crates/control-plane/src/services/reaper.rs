//! Auto-pauses tenants idle beyond a threshold, oldest-inactive first,
//! capped per run so the deprovisioning backend is never flooded.
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::external::ActivityTracker;
use crate::services::lifecycle::LifecycleController;
use crate::store::Store;

pub struct InactivityReaper {
    store: Arc<dyn Store>,
    lifecycle: Arc<LifecycleController>,
    activity: Arc<dyn ActivityTracker>,
    pub threshold: Duration,
    pub max_per_run: usize,
}

impl InactivityReaper {
    pub fn new(
        store: Arc<dyn Store>,
        lifecycle: Arc<LifecycleController>,
        activity: Arc<dyn ActivityTracker>,
        threshold: Duration,
        max_per_run: usize,
    ) -> Self {
        Self { store, lifecycle, activity, threshold, max_per_run }
    }

    /// Pure read: apps whose last authenticated access is older than the
    /// threshold, oldest first. Apps the tracker has never seen are not
    /// considered inactive (no signal is not the same as idle).
    pub async fn list_inactive_apps(&self, threshold: Duration) -> Result<Vec<Uuid>> {
        let cutoff = Utc::now() - threshold;
        let mut idle: Vec<(DateTime<Utc>, Uuid)> = Vec::new();
        for app in self.store.list_apps().await? {
            if let Some(last_seen) = self.activity.last_seen(app.id).await {
                if last_seen < cutoff {
                    idle.push((last_seen, app.id));
                }
            }
        }
        idle.sort();
        Ok(idle.into_iter().map(|(_, id)| id).collect())
    }

    /// Pause up to `max_to_pause` of the oldest-inactive apps. An app whose
    /// pause transition is rejected (already paused, mid-deployment, ...) is
    /// skipped, not an error; only apps actually paused are returned.
    pub async fn pause_inactive_apps(&self, max_to_pause: usize) -> Result<Vec<Uuid>> {
        let candidates = self.list_inactive_apps(self.threshold).await?;
        let mut paused = Vec::new();
        for app_id in candidates.into_iter().take(max_to_pause) {
            match self.lifecycle.pause_app(app_id, "auto-paused: inactive").await {
                Ok(()) => paused.push(app_id),
                Err(Error::InvalidTransition { from, to }) => {
                    tracing::debug!(%app_id, %from, %to, "reaper skipped app");
                }
                Err(e) => {
                    tracing::warn!(%app_id, error = %e, "reaper pause failed, skipping");
                }
            }
        }
        if !paused.is_empty() {
            tracing::info!(count = paused.len(), "reaper paused inactive apps");
        }
        Ok(paused)
    }

    pub async fn run_loop(&self, interval: std::time::Duration) {
        loop {
            if let Err(e) = self.pause_inactive_apps(self.max_per_run).await {
                tracing::error!(error = %e, "reaper run failed");
            }
            tokio::time::sleep(interval).await;
        }
    }
}
