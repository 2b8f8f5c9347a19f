//! Application entrypoint and state wiring.

use std::sync::Arc;

use file_integrity_ledger::config::LedgerConfig;
use file_integrity_ledger::storage::FileStore;
use file_integrity_ledger::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "file_integrity_ledger=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 1) config
    let cfg = LedgerConfig::from_env().map_err(|e| {
        tracing::error!("configuration rejected: {e}");
        e
    })?;
    tracing::info!(?cfg, "starting file integrity ledger");

    // 2) open the ledger; genesis is written on first start only
    let store = FileStore::open(cfg.data_dir.clone())?;
    tracing::info!(dir = %store.dir().display(), "using block directory");
    let state = AppState::open(Arc::new(store), &cfg).map_err(|e| {
        tracing::error!("failed to open ledger: {e}");
        e
    })?;
    let tip = state.chain.tip();
    tracing::info!(tip = tip.index, block_hash = %tip.block_hash, "ledger ready");

    // 3) serve
    let app = file_integrity_ledger::app(state);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    tracing::info!("listening on http://{}", cfg.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
