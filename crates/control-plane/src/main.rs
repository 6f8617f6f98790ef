//! Binary entrypoint for the Nimbus control plane.
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::info;
use uuid::Uuid;

use control_plane::config::Config;
use control_plane::db::init_db;
use control_plane::external::{
    AlwaysReadyProvisioner, InMemoryActivity, InProcessSnapshots, SimulatedExecutor,
};
use control_plane::store::{mem::MemStore, pg::PgStore, Store};
use control_plane::telemetry::{normalize_path, HTTP_REQUESTS};
use control_plane::{build_router, AppState, ServiceSettings};

async fn track_metrics(mut req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path_label = normalize_path(req.uri().path());
    let req_id = Uuid::new_v4();
    req.extensions_mut().insert(req_id);
    let mut resp = next.run(req).await;
    let status = resp.status().as_u16().to_string();
    HTTP_REQUESTS
        .with_label_values(&[method.as_str(), path_label.as_str(), status.as_str()])
        .inc();
    if let Ok(v) = HeaderValue::from_str(&req_id.to_string()) {
        resp.headers_mut().insert("x-request-id", v);
    }
    resp
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();
    let cfg = Config::from_env();

    let store: Arc<dyn Store> = if cfg.in_memory {
        info!("running on the in-memory store (NIMBUS_IN_MEMORY=1)");
        Arc::new(MemStore::new())
    } else {
        let pool = init_db(&cfg.database_url).await?;
        Arc::new(PgStore::new(pool))
    };

    let settings = ServiceSettings {
        inactive_threshold: cfg.inactive_threshold,
        reaper_max_per_run: cfg.reaper_max_per_run,
        backup_staleness: cfg.backup_staleness,
    };
    let state = AppState::new(
        store,
        Arc::new(AlwaysReadyProvisioner),
        Arc::new(InProcessSnapshots::default()),
        Arc::new(InMemoryActivity::default()),
        Arc::new(SimulatedExecutor),
        settings,
    );

    let reaper = state.reaper.clone();
    let reaper_interval = cfg.reaper_interval;
    tokio::spawn(async move { reaper.run_loop(reaper_interval).await });
    let backups = state.backups.clone();
    let sweep_interval = cfg.stale_sweep_interval;
    tokio::spawn(async move { backups.run_stale_sweep(sweep_interval).await });

    const MAX_BODY_BYTES: usize = 1024 * 1024; // 1MB
    let app = build_router(state)
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(track_metrics));

    info!(addr = %cfg.bind_addr, "control-plane listening");
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!(target: "shutdown.signal", "received Ctrl+C");
        tokio::time::sleep(Duration::from_millis(200)).await; // graceful drain window
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}
