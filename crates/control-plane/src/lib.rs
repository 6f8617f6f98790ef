pub mod config;
pub mod db;
pub mod error;
pub mod external;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod test_support;

use std::sync::Arc;

use axum::{
    response::Html,
    routing::{get, post},
    Router,
};
use chrono::Duration;
use utoipa::OpenApi;

use crate::external::{ActivityTracker, ProvisioningBackend, SnapshotBackend, StageExecutor};
use crate::handlers::{
    apps::{
        app_history, create_app, get_app, list_apps, pause_app, provision_app,
        request_transition, unpause_app,
    },
    backups::{
        complete_backup, create_backup, get_restore_job, list_backups, restore_backup,
        schedule_all_backups, schedule_restore, stale_backups,
    },
    deployments::{
        advance_stage, create_deployment, deployment_logs, get_deployment, list_deployments,
    },
    health::{health, readiness},
};
use crate::services::{
    backups::BackupScheduler, lifecycle::LifecycleController, pipeline::DeploymentPipeline,
    reaper::InactivityReaper,
};
use crate::store::Store;
use crate::telemetry::metrics_handler;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub lifecycle: Arc<LifecycleController>,
    pub pipeline: Arc<DeploymentPipeline>,
    pub backups: Arc<BackupScheduler>,
    pub reaper: Arc<InactivityReaper>,
}

/// Knobs for the two background components; HTTP-level settings stay in
/// [`config::Config`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub inactive_threshold: Duration,
    pub reaper_max_per_run: usize,
    pub backup_staleness: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            inactive_threshold: Duration::days(7),
            reaper_max_per_run: 10,
            backup_staleness: Duration::hours(1),
        }
    }
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        provisioner: Arc<dyn ProvisioningBackend>,
        snapshots: Arc<dyn SnapshotBackend>,
        activity: Arc<dyn ActivityTracker>,
        executor: Arc<dyn StageExecutor>,
        settings: ServiceSettings,
    ) -> Self {
        let lifecycle = Arc::new(LifecycleController::new(store.clone(), provisioner));
        let pipeline =
            Arc::new(DeploymentPipeline::new(store.clone(), lifecycle.clone(), executor));
        let backups = Arc::new(BackupScheduler::new(
            store.clone(),
            lifecycle.clone(),
            snapshots,
            settings.backup_staleness,
        ));
        let reaper = Arc::new(InactivityReaper::new(
            store.clone(),
            lifecycle.clone(),
            activity,
            settings.inactive_threshold,
            settings.reaper_max_per_run,
        ));
        Self { store, lifecycle, pipeline, backups, reaper }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::health::readiness,
        handlers::apps::create_app,
        handlers::apps::list_apps,
        handlers::apps::get_app,
        handlers::apps::app_history,
        handlers::apps::request_transition,
        handlers::apps::provision_app,
        handlers::apps::pause_app,
        handlers::apps::unpause_app,
        handlers::deployments::create_deployment,
        handlers::deployments::list_deployments,
        handlers::deployments::get_deployment,
        handlers::deployments::advance_stage,
        handlers::deployments::deployment_logs,
        handlers::backups::create_backup,
        handlers::backups::list_backups,
        handlers::backups::complete_backup,
        handlers::backups::schedule_all_backups,
        handlers::backups::stale_backups,
        handlers::backups::restore_backup,
        handlers::backups::schedule_restore,
        handlers::backups::get_restore_job,
    ),
    components(schemas(error::ApiErrorBody)),
    tags((name = "nimbus", description = "Nimbus Control Plane API"))
)]
pub struct ApiDoc;

async fn swagger_ui() -> Html<String> {
    let html = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"/><title>Nimbus API Docs</title>
<link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
<div id="swagger-ui"></div>
<script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
<script>
window.onload = () => { SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' }); };
</script>
</body></html>"#;
    Html(html.to_string())
}

pub fn build_router(state: AppState) -> Router {
    let openapi = ApiDoc::openapi();
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readiness))
        .route("/metrics", get(metrics_handler))
        .route("/apps", post(create_app).get(list_apps))
        .route("/apps/:app_name", get(get_app))
        .route("/apps/:app_name/history", get(app_history))
        .route("/apps/:app_name/state", post(request_transition))
        .route("/apps/:app_name/provision", post(provision_app))
        .route("/apps/:app_name/pause", post(pause_app))
        .route("/apps/:app_name/unpause", post(unpause_app))
        .route("/apps/:app_name/backups", get(list_backups))
        .route("/apps/:app_name/restore", post(restore_backup))
        .route("/apps/:app_name/restore/schedule", post(schedule_restore))
        .route("/deployments", post(create_deployment).get(list_deployments))
        .route("/deployments/:id", get(get_deployment))
        .route("/deployments/:id/stages/:stage", post(advance_stage))
        .route("/deployments/:id/logs", get(deployment_logs))
        .route("/backups", post(create_backup))
        .route("/backups/schedule-all", post(schedule_all_backups))
        .route("/backups/stale", get(stale_backups))
        .route("/backups/:id/complete", post(complete_backup))
        .route("/restore-jobs/:id", get(get_restore_job))
        .route("/openapi.json", get(move || async move { axum::Json(openapi.clone()) }))
        .route("/swagger", get(swagger_ui))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn health_ok() {
        let app = build_router(test_support::test_state());
        let res = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v, json!({"status":"ok"}));
    }

    #[tokio::test]
    async fn readiness_ok() {
        let app = build_router(test_support::test_state());
        let res = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_apps_empty() {
        let app = build_router(test_support::test_state());
        let res = app
            .oneshot(Request::builder().uri("/apps").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v, json!([]));
    }

    #[tokio::test]
    async fn create_app_conflict_error_json() {
        let state = test_support::test_state();
        let body = json!({"name": "dupe", "workspace_id": uuid::Uuid::new_v4()}).to_string();
        let req = |b: String| {
            Request::builder()
                .method("POST")
                .uri("/apps")
                .header("content-type", "application/json")
                .body(Body::from(b))
                .unwrap()
        };
        let res = build_router(state.clone()).oneshot(req(body.clone())).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let res = build_router(state).oneshot(req(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
        let bytes = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["code"], "conflict");
    }

    #[tokio::test]
    async fn create_deployment_on_unprovisioned_app_conflicts() {
        let state = test_support::test_state();
        let app = state
            .lifecycle
            .create_app("demo", uuid::Uuid::new_v4(), "eu-central-1", "starter")
            .await
            .unwrap();
        assert_eq!(app.desired_state, crate::state::LifecycleState::Uninitialized.code());
        let body = json!({"app_name": "demo", "commit_sha": "abc123"}).to_string();
        let req = Request::builder()
            .method("POST")
            .uri("/deployments")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
        let bytes = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["code"], "app_not_live");
    }
}
