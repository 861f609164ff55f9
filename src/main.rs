// =============================================================================
// Pulse Gateway — Main Entry Point
// =============================================================================
//
// Mode-aware market-signal gateway for USDT perpetuals. An external cron
// (or the optional in-process scheduler) fires the ingestor and evaluator
// every five minutes; the gateway decides, per symbol and per mode, whether
// an entry is actionable right now and emits at most one notification per
// instrument per cooldown window.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod bucket;
mod config;
mod derive;
mod notify;
mod okx;
mod pipeline;
mod scheduler;
mod series;
mod snapshot;
mod source;
mod store;
mod types;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::GatewayConfig;
use crate::notify::{LogNotifier, Notifier, TelegramNotifier};
use crate::okx::OkxClient;
use crate::store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env();

    if config.alert_key.is_empty() {
        warn!("ALERT_KEY is not set — every /alert request will be rejected");
    }

    info!(
        symbols = ?config.symbols,
        modes = ?config.effective_modes().iter().map(|m| m.as_str()).collect::<Vec<_>>(),
        cooldown_minutes = config.cooldown_minutes,
        macro_enabled = config.macro_enabled,
        "gateway configuration loaded"
    );

    // ── 2. Wire the ports ────────────────────────────────────────────────
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(OkxClient::new());

    let notifier: Arc<dyn Notifier> =
        if config.telegram_bot_token.is_empty() || config.telegram_chat_id.is_empty() {
            warn!("telegram credentials missing — alerts will only be logged");
            Arc::new(LogNotifier)
        } else {
            Arc::new(TelegramNotifier::new(
                config.telegram_bot_token.clone(),
                config.telegram_chat_id.clone(),
            ))
        };

    let bind_addr = config.bind_addr.clone();
    let scheduler_enabled = config.scheduler_enabled;

    let state = Arc::new(AppState::new(config, store, source, notifier));

    // ── 3. Optional in-process tick driver ───────────────────────────────
    if scheduler_enabled {
        let sched_state = state.clone();
        tokio::spawn(async move {
            scheduler::run(sched_state).await;
        });
    }

    // ── 4. Serve the entry points ────────────────────────────────────────
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            warn!("shutdown signal received — stopping");
        })
        .await?;

    info!("pulse gateway shut down complete");
    Ok(())
}
