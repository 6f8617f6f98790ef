//! Single authority for app state changes. Every transition goes through
//! [`LifecycleController::request_transition`]; nothing else writes state.
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::external::ProvisioningBackend;
use crate::models::{AppStateHistoryEntry, Application};
use crate::state::LifecycleState;
use crate::store::{NewApp, Store};
use crate::telemetry::STATE_TRANSITIONS;

pub struct LifecycleController {
    store: Arc<dyn Store>,
    provisioner: Arc<dyn ProvisioningBackend>,
    // Transitions for one app are strictly serialized on this lock; waiters
    // queue rather than fail, and legality is evaluated after acquisition
    // against whatever state the in-flight transition left behind.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl LifecycleController {
    pub fn new(store: Arc<dyn Store>, provisioner: Arc<dyn ProvisioningBackend>) -> Self {
        Self { store, provisioner, locks: DashMap::new() }
    }

    fn app_lock(&self, app_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(app_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn create_app(
        &self,
        name: &str,
        workspace_id: Uuid,
        region: &str,
        plan: &str,
    ) -> Result<Application> {
        let app = self
            .store
            .insert_app(NewApp {
                name: name.to_string(),
                workspace_id,
                region: region.to_string(),
                plan: plan.to_string(),
            })
            .await?;
        tracing::info!(app_id = %app.id, name, "app created");
        Ok(app)
    }

    pub async fn get_app(&self, app_id: Uuid) -> Result<Application> {
        self.store
            .get_app(app_id)
            .await?
            .ok_or_else(|| Error::not_found("application", app_id))
    }

    /// State of the most recent history row.
    pub async fn current_state(&self, app_id: Uuid) -> Result<LifecycleState> {
        let entry = self
            .store
            .latest_history(app_id)
            .await?
            .ok_or_else(|| Error::not_found("application", app_id))?;
        entry.state().ok_or_else(|| Error::not_found("state code", entry.state_id))
    }

    /// Guard used by the deployment pipeline and backup scheduler.
    pub async fn ensure_live(&self, app_id: Uuid) -> Result<()> {
        match self.current_state(app_id).await? {
            LifecycleState::Live => Ok(()),
            actual => Err(Error::AppNotLive { actual }),
        }
    }

    pub async fn history(&self, app_id: Uuid) -> Result<Vec<AppStateHistoryEntry>> {
        self.get_app(app_id).await?;
        self.store.history(app_id).await
    }

    /// Validate and record one transition under the app lock.
    pub async fn request_transition(
        &self,
        app_id: Uuid,
        target: LifecycleState,
        message: Option<String>,
    ) -> Result<AppStateHistoryEntry> {
        let lock = self.app_lock(app_id);
        let _guard = lock.lock().await;
        self.transition_locked(app_id, target, message).await
    }

    async fn transition_locked(
        &self,
        app_id: Uuid,
        target: LifecycleState,
        message: Option<String>,
    ) -> Result<AppStateHistoryEntry> {
        let current = self.current_state(app_id).await?;
        if !current.can_transition(target) {
            return Err(Error::InvalidTransition { from: current, to: target });
        }
        let entry = self.store.record_transition(app_id, target, message).await?;
        STATE_TRANSITIONS.with_label_values(&[target.name()]).inc();
        tracing::info!(%app_id, from = %current, to = %target, "state transition");
        Ok(entry)
    }

    /// Drive Uninitialized/Errored -> Provisioning -> Live. Holds the app
    /// lock across the backend call; a backend failure lands in `Errored`
    /// with the backend's message and is never retried here.
    pub async fn provision_app(&self, app_id: Uuid) -> Result<()> {
        let lock = self.app_lock(app_id);
        let _guard = lock.lock().await;
        self.transition_locked(app_id, LifecycleState::Provisioning, None).await?;
        match self.provisioner.provision(app_id).await {
            Ok(()) => {
                self.transition_locked(
                    app_id,
                    LifecycleState::Live,
                    Some("provisioner reported ready".into()),
                )
                .await?;
                Ok(())
            }
            Err(e) => self.record_external_failure(app_id, "provision", e).await,
        }
    }

    /// Drive Live/Errored -> Pausing -> Paused; Pausing is held until the
    /// backend confirms the compute is torn down.
    pub async fn pause_app(&self, app_id: Uuid, reason: &str) -> Result<()> {
        let lock = self.app_lock(app_id);
        let _guard = lock.lock().await;
        self.transition_locked(app_id, LifecycleState::Pausing, Some(reason.to_string()))
            .await?;
        match self.provisioner.teardown(app_id).await {
            Ok(()) => {
                self.transition_locked(
                    app_id,
                    LifecycleState::Paused,
                    Some("compute torn down".into()),
                )
                .await?;
                Ok(())
            }
            Err(e) => self.record_external_failure(app_id, "pause", e).await,
        }
    }

    /// Drive Paused/Errored -> Unpausing -> Live.
    pub async fn unpause_app(&self, app_id: Uuid) -> Result<()> {
        let lock = self.app_lock(app_id);
        let _guard = lock.lock().await;
        self.transition_locked(app_id, LifecycleState::Unpausing, None).await?;
        match self.provisioner.provision(app_id).await {
            Ok(()) => {
                self.transition_locked(
                    app_id,
                    LifecycleState::Live,
                    Some("provisioner reported ready".into()),
                )
                .await?;
                Ok(())
            }
            Err(e) => self.record_external_failure(app_id, "unpause", e).await,
        }
    }

    async fn record_external_failure(
        &self,
        app_id: Uuid,
        operation: &str,
        err: anyhow::Error,
    ) -> Result<()> {
        let message = format!("{operation} failed: {err}");
        tracing::error!(%app_id, error = %err, "external {operation} failure");
        self.transition_locked(app_id, LifecycleState::Errored, Some(message.clone()))
            .await?;
        Err(Error::ExternalFailure(message))
    }
}
