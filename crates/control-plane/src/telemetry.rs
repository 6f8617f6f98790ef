use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{opts, Encoder, IntCounterVec, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        opts!("http_requests_total", "HTTP request count"),
        &["method", "path", "status"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static STATE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        opts!("app_state_transitions_total", "Lifecycle transitions recorded"),
        &["target"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static DEPLOYMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        opts!("deployments_total", "Deployments reaching a terminal status"),
        &["status"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static BACKUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("backups_total", "Backup operations"), &["outcome"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&metric_families, &mut buf).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([("Content-Type", "text/plain; version=0.0.4")], buf).into_response()
}

/// Collapse ids so metric label cardinality stays bounded.
pub fn normalize_path(path: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for seg in path.split('/') {
        if seg.is_empty() {
            out.push(String::new());
            continue;
        }
        let is_id =
            seg.chars().all(|c| c.is_ascii_digit()) || uuid::Uuid::parse_str(seg).is_ok();
        if is_id {
            out.push(":id".into());
        } else if out.last().map(|s| s == "apps").unwrap_or(false) {
            out.push(":app_name".into());
        } else {
            out.push(seg.to_string());
        }
    }
    out.join("/")
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn normalize_collapses_ids_and_app_names() {
        assert_eq!(normalize_path("/deployments/123"), "/deployments/:id");
        assert_eq!(
            normalize_path("/deployments/550e8400-e29b-41d4-a716-446655440000"),
            "/deployments/:id"
        );
        assert_eq!(normalize_path("/apps/myapp/deployments"), "/apps/:app_name/deployments");
        assert_eq!(normalize_path("/apps"), "/apps");
    }
}
