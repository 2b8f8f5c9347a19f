//! File integrity ledger: a single-writer, hash-chained log of file
//! registrations and verifications, served over HTTP.
//!
//! | Route                       | Handler                    |
//! |-----------------------------|----------------------------|
//! | `POST /register`            | [`routes::register_file`]  |
//! | `POST /verify`              | [`routes::verify_file`]    |
//! | `GET /history`              | [`routes::history_all`]    |
//! | `GET /validate`             | [`routes::validate_chain`] |
//! | `GET /demo`                 | [`routes::demo`]           |
//! | `GET /api/history_user`     | [`routes::history_user`]   |
//! | `GET /api/history_file`     | [`routes::history_file`]   |
//! | `GET /stats`                | [`routes::stats`]          |
//! | `GET /health`, `/version`   | liveness and build info    |

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod model;
pub mod query;
pub mod routes;
pub mod storage;
pub mod workflow;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chain::{ChainError, ChainManager};
use crate::config::LedgerConfig;
use crate::query::HistoryService;
use crate::storage::LedgerStore;
use crate::workflow::IntegrityService;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<ChainManager>,
    pub integrity: Arc<IntegrityService>,
    pub history: HistoryService,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Open the ledger on `store` (creating genesis if needed) and wire the
    /// services around it.
    pub fn open(store: Arc<dyn LedgerStore>, cfg: &LedgerConfig) -> Result<Self, ChainError> {
        let chain = Arc::new(ChainManager::open(store.clone(), cfg.append_attempts)?);
        Ok(Self {
            integrity: Arc::new(IntegrityService::new(chain.clone(), cfg.duplicate_policy)),
            history: HistoryService::new(store),
            chain,
            max_upload_bytes: cfg.max_upload_bytes,
        })
    }
}

/// Build the router with tracing, CORS and the upload size limit applied.
pub fn app(state: AppState) -> Router {
    let limit = state.max_upload_bytes;
    Router::new()
        .route("/register", post(routes::register_file))
        .route("/verify", post(routes::verify_file))
        .route("/history", get(routes::history_all))
        .route("/validate", get(routes::validate_chain))
        .route("/demo", get(routes::demo))
        .route("/api/history_user", get(routes::history_user))
        .route("/api/history_file", get(routes::history_file))
        .route("/stats", get(routes::stats))
        .route("/health", get(routes::health))
        .route("/version", get(routes::version))
        .layer(DefaultBodyLimit::max(limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
