// src/serve/mod.rs
//
// Read-only viewer. The store is loaded once; every request reads the same
// snapshot and nothing is ever written back.
pub mod handlers;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::{collections::BTreeMap, net::SocketAddr, path::Path, sync::Arc};
use tracing::{info, warn};

use crate::config::Config;
use crate::geography::{self, CountyLocation};
use crate::history::{BuildRun, History};
use crate::store::{read_store, StoreSnapshot};

pub struct AppState {
    pub snapshot: StoreSnapshot,
    /// Sidecar entries by county_id.
    pub places: BTreeMap<String, CountyLocation>,
    pub last_build: Option<BuildRun>,
}

impl AppState {
    pub fn new(
        snapshot: StoreSnapshot,
        places: Vec<CountyLocation>,
        last_build: Option<BuildRun>,
    ) -> Self {
        AppState {
            snapshot,
            places: places.into_iter().map(|l| (l.county_id.clone(), l)).collect(),
            last_build,
        }
    }

    /// Load the store (fatal if missing or corrupt), the county sidecar and
    /// the most recent build. The last two are optional.
    pub fn load(cfg: &Config) -> Result<Self> {
        let store_path = cfg.store_path();
        let snapshot = read_store(&store_path)?;
        let places = load_places(&cfg.counties_path());
        let last_build = History::open(cfg.history_dir())
            .last_build()
            .unwrap_or_else(|e| {
                warn!("build history unreadable: {:#}", e);
                None
            });
        info!(
            rows = snapshot.records.len(),
            counties = places.len(),
            years = ?snapshot.years(),
            "store loaded for viewer"
        );
        Ok(AppState::new(snapshot, places, last_build))
    }
}

fn load_places(path: &Path) -> Vec<CountyLocation> {
    if !path.is_file() {
        warn!(path = %path.display(), "no county sidecar; names blank, positions approximate");
        return Vec::new();
    }
    geography::read_locations(path).unwrap_or_else(|e| {
        warn!(path = %path.display(), "ignoring unreadable county sidecar: {:#}", e);
        Vec::new()
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/healthz", get(handlers::healthz))
        .route("/api/meta", get(handlers::meta))
        .route("/api/counties", get(handlers::counties))
        .route("/api/summary", get(handlers::summary))
        .route("/api/export.csv", get(handlers::export_csv))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(cfg: &Config) -> Result<()> {
    let state = Arc::new(AppState::load(cfg)?);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.serve.host, cfg.serve.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.serve.host, cfg.serve.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("viewer listening on http://{}", addr);

    axum::serve(listener, app).await.context("viewer server failed")?;
    Ok(())
}
