use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::app_by_name;
use crate::error::{ApiError, ApiResult};
use crate::models::{CommitInfo, Deployment, DeploymentLogLine, Stage};
use crate::services::pipeline::StageOutcome;
use crate::AppState;

#[derive(Deserialize, ToSchema)]
pub struct CreateDeploymentRequest {
    pub app_name: String,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub commit_user_name: Option<String>,
    pub commit_user_avatar_url: Option<String>,
}

/// Start a deployment pipeline for a commit
#[utoipa::path(post, path = "/deployments", request_body = CreateDeploymentRequest,
    responses((status = 201, body = Deployment), (status = 409, description = "app not live"), (status = 404)))]
#[tracing::instrument(level = "info", skip(state, req), fields(app_name = %req.app_name, commit_sha = %req.commit_sha))]
pub async fn create_deployment(
    State(state): State<AppState>,
    Json(req): Json<CreateDeploymentRequest>,
) -> ApiResult<(StatusCode, Json<Deployment>)> {
    let app = app_by_name(&state, &req.app_name).await?;
    let commit = CommitInfo {
        sha: req.commit_sha,
        message: req.commit_message,
        user_name: req.commit_user_name,
        user_avatar_url: req.commit_user_avatar_url,
    };
    let deployment = state.pipeline.start_deployment(app.id, commit).await?;
    Ok((StatusCode::CREATED, Json(deployment)))
}

#[derive(Deserialize, ToSchema)]
pub struct DeploymentQuery {
    pub app_name: String,
}

/// List deployments for an app, newest first
#[utoipa::path(get, path = "/deployments",
    params(("app_name" = String, Query, description = "Application name")),
    responses((status = 200, body = [Deployment]), (status = 404)))]
pub async fn list_deployments(
    State(state): State<AppState>,
    Query(q): Query<DeploymentQuery>,
) -> ApiResult<Json<Vec<Deployment>>> {
    let app = app_by_name(&state, &q.app_name).await?;
    Ok(Json(state.pipeline.list_for_app(app.id).await?))
}

/// Full stage matrix for one deployment (poll target for the dashboard)
#[utoipa::path(get, path = "/deployments/{id}", params(("id" = Uuid, Path,)),
    responses((status = 200, body = Deployment), (status = 404)))]
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Deployment>> {
    Ok(Json(state.pipeline.get_deployment(id).await?))
}

#[derive(Deserialize, ToSchema)]
pub struct AdvanceStageRequest {
    /// "started", "succeeded" or "failed"
    pub outcome: String,
    pub reason: Option<String>,
}

fn parse_stage(name: &str) -> Result<Stage, ApiError> {
    // The umbrella stage is resolved by the pipeline, not reported to it.
    match name {
        "metadata" => Ok(Stage::Metadata),
        "migrations" => Ok(Stage::Migrations),
        "functions" => Ok(Stage::Functions),
        _ => Err(ApiError::bad_request(format!("unknown stage {name}"))),
    }
}

/// Report a stage outcome (idempotent for repeated identical outcomes)
#[utoipa::path(post, path = "/deployments/{id}/stages/{stage}",
    params(("id" = Uuid, Path,), ("stage" = String, Path, description = "metadata | migrations | functions")),
    request_body = AdvanceStageRequest,
    responses((status = 200, body = Deployment), (status = 409, description = "conflicting outcome"), (status = 404)))]
#[tracing::instrument(level = "info", skip(state, req), fields(deployment_id = %id, stage = %stage, outcome = %req.outcome))]
pub async fn advance_stage(
    State(state): State<AppState>,
    Path((id, stage)): Path<(Uuid, String)>,
    Json(req): Json<AdvanceStageRequest>,
) -> ApiResult<Json<Deployment>> {
    let stage = parse_stage(&stage)?;
    let outcome = match req.outcome.as_str() {
        "started" => StageOutcome::Started,
        "succeeded" => StageOutcome::Succeeded,
        "failed" => {
            StageOutcome::Failed(req.reason.unwrap_or_else(|| "unspecified failure".into()))
        }
        other => return Err(ApiError::bad_request(format!("unknown outcome {other}"))),
    };
    Ok(Json(state.pipeline.advance_stage(id, stage, outcome).await?))
}

/// Ordered pipeline log lines
#[utoipa::path(get, path = "/deployments/{id}/logs", params(("id" = Uuid, Path,)),
    responses((status = 200, body = [DeploymentLogLine]), (status = 404)))]
pub async fn deployment_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<DeploymentLogLine>>> {
    Ok(Json(state.pipeline.logs(id).await?))
}
