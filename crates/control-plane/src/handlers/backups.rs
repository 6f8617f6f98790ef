use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::app_by_name;
use crate::error::ApiResult;
use crate::models::{Backup, BulkBackupReport, RestoreJob};
use crate::AppState;

#[derive(Deserialize, ToSchema)]
pub struct CreateBackupRequest {
    pub app_name: String,
}

/// Schedule a backup for one app
#[utoipa::path(post, path = "/backups", request_body = CreateBackupRequest,
    responses((status = 201, body = Backup), (status = 409, description = "app not live"), (status = 404)))]
#[tracing::instrument(level = "info", skip(state, req), fields(app_name = %req.app_name))]
pub async fn create_backup(
    State(state): State<AppState>,
    Json(req): Json<CreateBackupRequest>,
) -> ApiResult<(StatusCode, Json<Backup>)> {
    let app = app_by_name(&state, &req.app_name).await?;
    let backup = state.backups.create_backup(app.id).await?;
    Ok((StatusCode::CREATED, Json(backup)))
}

/// Backups for an app, newest first
#[utoipa::path(get, path = "/apps/{app_name}/backups", params(("app_name" = String, Path,)),
    responses((status = 200, body = [Backup]), (status = 404)))]
pub async fn list_backups(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> ApiResult<Json<Vec<Backup>>> {
    let app = app_by_name(&state, &app_name).await?;
    Ok(Json(state.backups.list_backups(app.id).await?))
}

#[derive(Deserialize, ToSchema)]
pub struct CompleteBackupRequest {
    pub size: i64,
}

/// Snapshot worker callback; idempotent
#[utoipa::path(post, path = "/backups/{id}/complete", params(("id" = Uuid, Path,)),
    request_body = CompleteBackupRequest,
    responses((status = 200, body = Backup), (status = 404)))]
#[tracing::instrument(level = "info", skip(state, req), fields(backup_id = %id, size = req.size))]
pub async fn complete_backup(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteBackupRequest>,
) -> ApiResult<Json<Backup>> {
    Ok(Json(state.backups.complete_backup(id, req.size).await?))
}

/// Fleet-wide backup run (best effort, per-app failures collected)
#[utoipa::path(post, path = "/backups/schedule-all",
    responses((status = 200, body = BulkBackupReport)))]
#[tracing::instrument(level = "info", skip(state))]
pub async fn schedule_all_backups(
    State(state): State<AppState>,
) -> ApiResult<Json<BulkBackupReport>> {
    Ok(Json(state.backups.schedule_backup_all().await?))
}

/// Pending backups older than the staleness threshold (operator view)
#[utoipa::path(get, path = "/backups/stale", responses((status = 200, body = [Backup])))]
pub async fn stale_backups(State(state): State<AppState>) -> ApiResult<Json<Vec<Backup>>> {
    Ok(Json(state.backups.stale_backups().await?))
}

#[derive(Deserialize, ToSchema)]
pub struct RestoreRequest {
    pub backup_id: Uuid,
}

/// Synchronous restore; the app passes through `updating` and back to `live`
#[utoipa::path(post, path = "/apps/{app_name}/restore", params(("app_name" = String, Path,)),
    request_body = RestoreRequest,
    responses((status = 200), (status = 409), (status = 502), (status = 404)))]
#[tracing::instrument(level = "info", skip(state, req), fields(app_name = %app_name, backup_id = %req.backup_id))]
pub async fn restore_backup(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
    Json(req): Json<RestoreRequest>,
) -> ApiResult<StatusCode> {
    let app = app_by_name(&state, &app_name).await?;
    state.backups.restore_backup(app.id, req.backup_id).await?;
    Ok(StatusCode::OK)
}

/// Asynchronous restore: returns a job record immediately; state is
/// re-validated when the job runs
#[utoipa::path(post, path = "/apps/{app_name}/restore/schedule", params(("app_name" = String, Path,)),
    request_body = RestoreRequest,
    responses((status = 202, body = RestoreJob), (status = 404)))]
#[tracing::instrument(level = "info", skip(state, req), fields(app_name = %app_name, backup_id = %req.backup_id))]
pub async fn schedule_restore(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
    Json(req): Json<RestoreRequest>,
) -> ApiResult<(StatusCode, Json<RestoreJob>)> {
    let app = app_by_name(&state, &app_name).await?;
    let job = state.backups.schedule_restore_backup(app.id, req.backup_id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// Restore job status
#[utoipa::path(get, path = "/restore-jobs/{id}", params(("id" = Uuid, Path,)),
    responses((status = 200, body = RestoreJob), (status = 404)))]
pub async fn get_restore_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RestoreJob>> {
    Ok(Json(state.backups.get_restore_job(id).await?))
}
