pub mod apps;
pub mod backups;
pub mod deployments;
pub mod health;

use crate::error::ApiError;
use crate::models::Application;
use crate::AppState;

/// Resolve an application by its route name.
pub(crate) async fn app_by_name(state: &AppState, name: &str) -> Result<Application, ApiError> {
    state
        .store
        .find_app_by_name(name)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("application {name} not found")))
}
