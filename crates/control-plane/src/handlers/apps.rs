use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::app_by_name;
use crate::error::ApiResult;
use crate::models::{AppStateHistoryEntry, Application};
use crate::state::LifecycleState;
use crate::AppState;

#[derive(Deserialize, ToSchema)]
pub struct CreateAppRequest {
    pub name: String,
    pub workspace_id: Uuid,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_plan")]
    pub plan: String,
}

fn default_region() -> String {
    "eu-central-1".into()
}

fn default_plan() -> String {
    "starter".into()
}

/// Create application (starts in `uninitialized`)
#[utoipa::path(post, path = "/apps", request_body = CreateAppRequest,
    responses((status = 201, body = Application), (status = 409, description = "name taken")))]
#[tracing::instrument(level = "info", skip(state, req), fields(name = %req.name))]
pub async fn create_app(
    State(state): State<AppState>,
    Json(req): Json<CreateAppRequest>,
) -> ApiResult<(StatusCode, Json<Application>)> {
    let app = state
        .lifecycle
        .create_app(&req.name, req.workspace_id, &req.region, &req.plan)
        .await?;
    Ok((StatusCode::CREATED, Json(app)))
}

/// List applications
#[utoipa::path(get, path = "/apps", responses((status = 200, body = [Application])))]
pub async fn list_apps(State(state): State<AppState>) -> ApiResult<Json<Vec<Application>>> {
    Ok(Json(state.store.list_apps().await?))
}

#[derive(Serialize, ToSchema)]
pub struct AppStatusResponse {
    #[serde(flatten)]
    pub app: Application,
    pub current_state: LifecycleState,
}

/// Application with its current lifecycle state
#[utoipa::path(get, path = "/apps/{app_name}", params(("app_name" = String, Path,)),
    responses((status = 200, body = AppStatusResponse), (status = 404)))]
pub async fn get_app(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> ApiResult<Json<AppStatusResponse>> {
    let app = app_by_name(&state, &app_name).await?;
    let current_state = state.lifecycle.current_state(app.id).await?;
    Ok(Json(AppStatusResponse { app, current_state }))
}

/// Full state history, oldest first
#[utoipa::path(get, path = "/apps/{app_name}/history", params(("app_name" = String, Path,)),
    responses((status = 200, body = [AppStateHistoryEntry]), (status = 404)))]
pub async fn app_history(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> ApiResult<Json<Vec<AppStateHistoryEntry>>> {
    let app = app_by_name(&state, &app_name).await?;
    Ok(Json(state.lifecycle.history(app.id).await?))
}

#[derive(Deserialize, ToSchema)]
pub struct TransitionRequest {
    pub target: LifecycleState,
    pub message: Option<String>,
}

/// Request an explicit state transition
#[utoipa::path(post, path = "/apps/{app_name}/state", params(("app_name" = String, Path,)),
    request_body = TransitionRequest,
    responses((status = 200, body = AppStateHistoryEntry), (status = 409, description = "illegal transition")))]
#[tracing::instrument(level = "info", skip(state, req), fields(app_name = %app_name, target = %req.target))]
pub async fn request_transition(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> ApiResult<Json<AppStateHistoryEntry>> {
    let app = app_by_name(&state, &app_name).await?;
    let entry = state.lifecycle.request_transition(app.id, req.target, req.message).await?;
    Ok(Json(entry))
}

#[derive(Serialize, ToSchema)]
pub struct DriveResponse {
    pub current_state: LifecycleState,
}

/// Provision the app (drives it to `live`)
#[utoipa::path(post, path = "/apps/{app_name}/provision", params(("app_name" = String, Path,)),
    responses((status = 200, body = DriveResponse), (status = 502, description = "backend failure")))]
#[tracing::instrument(level = "info", skip(state), fields(app_name = %app_name))]
pub async fn provision_app(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> ApiResult<Json<DriveResponse>> {
    let app = app_by_name(&state, &app_name).await?;
    state.lifecycle.provision_app(app.id).await?;
    Ok(Json(DriveResponse { current_state: state.lifecycle.current_state(app.id).await? }))
}

/// Pause the app (tears down its compute)
#[utoipa::path(post, path = "/apps/{app_name}/pause", params(("app_name" = String, Path,)),
    responses((status = 200, body = DriveResponse), (status = 409)))]
#[tracing::instrument(level = "info", skip(state), fields(app_name = %app_name))]
pub async fn pause_app(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> ApiResult<Json<DriveResponse>> {
    let app = app_by_name(&state, &app_name).await?;
    state.lifecycle.pause_app(app.id, "paused by user").await?;
    Ok(Json(DriveResponse { current_state: state.lifecycle.current_state(app.id).await? }))
}

/// Unpause the app (next authenticated access path)
#[utoipa::path(post, path = "/apps/{app_name}/unpause", params(("app_name" = String, Path,)),
    responses((status = 200, body = DriveResponse), (status = 409)))]
#[tracing::instrument(level = "info", skip(state), fields(app_name = %app_name))]
pub async fn unpause_app(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> ApiResult<Json<DriveResponse>> {
    let app = app_by_name(&state, &app_name).await?;
    state.lifecycle.unpause_app(app.id).await?;
    Ok(Json(DriveResponse { current_state: state.lifecycle.current_state(app.id).await? }))
}
