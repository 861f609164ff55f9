// =============================================================================
// REST Endpoints — Axum 0.7
// =============================================================================
//
// Two scheduled entry points plus a public health probe:
//
//   GET /health               liveness (public)
//   GET /snapshot?symbols=…   ingestor tick
//   GET /alert?key=…          evaluator tick (authenticated)
//
// The response bodies stay minimal by default; `debug=1` on the evaluator
// adds the macro analysis, per-symbol skip reasons, the heartbeat echo and
// the rendered message.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::api::auth;
use crate::app_state::AppState;
use crate::config::parse_mode_list;
use crate::pipeline::{self, EvalRequest};
use crate::snapshot;
use crate::types::{Mode, RiskProfile, Timeframe};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/snapshot", get(run_snapshot))
        .route("/alert", get(run_alert))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_s": state.start_time.elapsed().as_secs(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Ingestor entry point
// =============================================================================

#[derive(Deserialize)]
struct SnapshotQuery {
    #[serde(default)]
    symbols: Option<String>,
}

async fn run_snapshot(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotQuery>,
) -> impl IntoResponse {
    let symbols = parse_symbols(query.symbols.as_deref())
        .unwrap_or_else(|| state.config.read().symbols.clone());

    let now_ms = chrono::Utc::now().timestamp_millis();
    let batch = snapshot::run_snapshot(
        state.store.clone(),
        state.source.clone(),
        &symbols,
        now_ms,
    )
    .await;

    Json(batch)
}

// =============================================================================
// Evaluator entry point
// =============================================================================

#[derive(Deserialize)]
struct AlertQuery {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    modes: Option<String>,
    #[serde(default)]
    risk_profile: Option<String>,
    #[serde(default)]
    driver_tf: Option<String>,
    #[serde(default)]
    force: Option<String>,
    #[serde(default)]
    dry: Option<String>,
    #[serde(default)]
    debug: Option<String>,
    #[serde(default)]
    symbols: Option<String>,
}

fn flag(raw: &Option<String>) -> bool {
    matches!(
        raw.as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes")
    )
}

async fn run_alert(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let expected = state.config.read().alert_key.clone();
    if !auth::authorize(&expected, query.key.as_deref(), &headers) {
        warn!("alert request rejected: bad or missing secret");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "ok": false, "error": "unauthorized" })),
        )
            .into_response();
    }

    let cfg = state.config_snapshot();

    let modes: Vec<Mode> = match (&query.modes, &query.mode) {
        (Some(list), _) => parse_mode_list(list),
        (None, Some(single)) => Mode::parse(single).into_iter().collect(),
        (None, None) => Vec::new(),
    };
    let modes = if modes.is_empty() {
        cfg.effective_modes()
    } else {
        modes
    };

    let risk_profile = query
        .risk_profile
        .as_deref()
        .and_then(RiskProfile::parse)
        .unwrap_or(cfg.default_risk_profile);

    let driver_tf = query.driver_tf.as_deref().and_then(Timeframe::parse);

    let symbols = parse_symbols(query.symbols.as_deref()).unwrap_or_else(|| cfg.symbols.clone());

    let req = EvalRequest {
        modes,
        risk_profile,
        driver_tf,
        force: flag(&query.force),
        dry: flag(&query.dry),
        debug: flag(&query.debug),
        symbols,
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    let report = pipeline::evaluate_tick(&state, &req, now_ms).await;

    let mut body = serde_json::json!({
        "ok": report.notify_error.is_none(),
        "run_id": report.run_id,
        "ts": report.ts,
        "sent": report.sent,
        "triggered_count": report.triggered_count,
        "evaluated": report.evaluated,
        "driver_tf": report.driver_tf.as_str(),
        "modes": report.modes.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
        "force": report.force,
        "dry": report.dry,
        "triggered": report.triggered_symbols,
    });

    if req.debug {
        if let Some(extras) = body.as_object_mut() {
            extras.insert(
                "macro".into(),
                serde_json::to_value(&report.macro_analysis).unwrap_or_default(),
            );
            extras.insert(
                "skips".into(),
                serde_json::to_value(&report.skips).unwrap_or_default(),
            );
            extras.insert("heartbeat".into(), report.heartbeat.clone());
            extras.insert("source_counters".into(), state.counters.snapshot());
            if let Some(message) = &report.message {
                extras.insert("message".into(), serde_json::Value::String(message.clone()));
            }
        }
    }

    if let Some(err) = &report.notify_error {
        if let Some(extras) = body.as_object_mut() {
            extras.insert(
                "error".into(),
                serde_json::Value::String(format!("telegram_failed: {err}")),
            );
        }
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
    }

    Json(body).into_response()
}

// =============================================================================
// Helpers
// =============================================================================

/// Split a comma-separated symbol list, uppercased. `None` when the
/// parameter is absent or empty.
fn parse_symbols(raw: Option<&str>) -> Option<Vec<String>> {
    let raw = raw?;
    let symbols: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        None
    } else {
        Some(symbols)
    }
}

// =============================================================================
// Tests
// =============================================================================
