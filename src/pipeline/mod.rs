// =============================================================================
// Evaluation Engine — the multi-stage gating pipeline
// =============================================================================
//
// Per symbol, per mode (scalp > swing > build), a strict gate sequence:
//
//   detection -> cooldown -> warmup -> bias -> macro -> entry validity
//
// Every denial carries a classified skip reason. `force` bypasses the
// detection and cooldown gates only. The first mode whose pipeline passes
// wins the symbol; subsequent modes are not evaluated. The detection gate
// seeds its stored state whenever it runs, so quiet regimes stay
// flip-detectable — except under dry-run, where nothing is written.

pub mod confidence;
pub mod detection;
pub mod entry;
pub mod gates;
pub mod leverage;

#[cfg(test)]
pub mod testutil;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::config::GatewayConfig;
use crate::derive::{self, DeriveOutcome, DerivedView, LevelsRecord};
use crate::notify::render;
use crate::store::{keys, KvStore, StateWriter};
use crate::types::{Lean, MarketState, Mode, RiskProfile, Timeframe, MODE_PRIORITY};

use confidence::Grade;
use entry::{B1Result, ExecReason};
use gates::MacroAnalysis;
use leverage::LeverageBand;

// =============================================================================
// Skip reasons
// =============================================================================

/// Why a symbol (or one of its modes) was denied. Rendered into the debug
/// payload and the heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SnapshotMissing,
    NoInstrument,
    NoDetectionTrigger,
    Cooldown,
    WarmupGate1h,
    MissingLevelsOrPrice,
    NeutralBias,
    MacroBlockBtcBullExpansion,
    NotAtEdge,
    NoPriceTrigger,
    OiNotConfirmed,
    OiCounterTrend,
    NoEntryTrigger,
    Error(String),
}

impl SkipReason {
    pub fn label(&self) -> String {
        match self {
            Self::SnapshotMissing => "snapshot_missing".into(),
            Self::NoInstrument => "no_instrument".into(),
            Self::NoDetectionTrigger => "no_detection_trigger".into(),
            Self::Cooldown => "cooldown".into(),
            Self::WarmupGate1h => "warmup_gate_1h".into(),
            Self::MissingLevelsOrPrice => "missing_levels_or_price".into(),
            Self::NeutralBias => "neutral_bias".into(),
            Self::MacroBlockBtcBullExpansion => "macro_block_btc_bull_expansion".into(),
            Self::NotAtEdge => "b1_not_at_edge".into(),
            Self::NoPriceTrigger => "no_price_trigger".into(),
            Self::OiNotConfirmed => "oi_not_confirmed".into(),
            Self::OiCounterTrend => "oi_counter_trend".into(),
            Self::NoEntryTrigger => "no_entry_trigger".into(),
            Self::Error(msg) => format!("error: {msg}"),
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

// =============================================================================
// Request / candidate / report
// =============================================================================

/// One evaluator invocation, as resolved from query + config by the caller.
#[derive(Debug, Clone)]
pub struct EvalRequest {
    /// Modes to evaluate; normalized to priority order internally.
    pub modes: Vec<Mode>,
    pub risk_profile: RiskProfile,
    pub driver_tf: Option<Timeframe>,
    pub force: bool,
    pub dry: bool,
    pub debug: bool,
    pub symbols: Vec<String>,
}

/// A symbol that passed every gate for some mode.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub view: DerivedView,
    pub mode: Mode,
    pub bias: Lean,
    pub detection_state: MarketState,
    pub exec_reason: ExecReason,
    pub b1: B1Result,
    pub levels_1h: LevelsRecord,
    pub confidence: Grade,
    pub leverage: Option<LeverageBand>,
}

/// Outcome of one symbol's pipeline.
#[derive(Debug)]
enum SymbolOutcome {
    Triggered(Box<Candidate>),
    Skipped(SkipReason),
}

/// Full result of one evaluator tick.
#[derive(Debug)]
pub struct EvalReport {
    pub run_id: String,
    pub ts: i64,
    pub sent: bool,
    pub triggered_count: usize,
    pub evaluated: usize,
    pub driver_tf: Timeframe,
    pub modes: Vec<Mode>,
    pub force: bool,
    pub dry: bool,
    pub triggered_symbols: Vec<String>,
    pub skips: BTreeMap<String, String>,
    pub macro_analysis: MacroAnalysis,
    pub message: Option<String>,
    pub heartbeat: serde_json::Value,
    pub notify_error: Option<String>,
}

// =============================================================================
// Entry point
// =============================================================================

/// Run the full gating pipeline over the requested symbols.
pub async fn evaluate_tick(state: &AppState, req: &EvalRequest, now_ms: i64) -> EvalReport {
    let cfg = state.config_snapshot();
    let writer = StateWriter::new(state.store.clone(), req.dry);
    let run_id = uuid::Uuid::new_v4().to_string();

    let requested = if req.modes.is_empty() {
        cfg.effective_modes()
    } else {
        req.modes.clone()
    };
    let modes: Vec<Mode> = MODE_PRIORITY
        .into_iter()
        .filter(|m| requested.contains(m))
        .collect();

    // -- Macro read (once per invocation) ------------------------------------
    let macro_analysis = if cfg.macro_enabled {
        match derive::derive_view(
            state.store.as_ref(),
            &writer,
            &state.counters,
            &cfg.macro_btc_symbol,
            now_ms,
            cfg.scalp_sweep_lookback,
        )
        .await
        {
            Ok(DeriveOutcome::Ready(btc_view)) => gates::analyze_macro(&cfg, Some(&btc_view)),
            Ok(_) => gates::analyze_macro(&cfg, None),
            Err(e) => {
                warn!(error = %e, "macro derivation failed — treating as unavailable");
                gates::analyze_macro(&cfg, None)
            }
        }
    } else {
        MacroAnalysis::disabled(&cfg)
    };

    // -- Per-symbol pipelines, bounded parallelism ---------------------------
    let concurrency = cfg.eval_concurrency.max(1);
    let mut outcomes: Vec<(usize, String, SymbolOutcome)> =
        stream::iter(req.symbols.iter().cloned().enumerate())
            .map(|(idx, symbol)| {
                let writer = writer.clone();
                let cfg = &cfg;
                let macro_analysis = &macro_analysis;
                let modes = &modes;
                async move {
                    let outcome = match evaluate_symbol(
                        state.store.as_ref(),
                        &writer,
                        state,
                        cfg,
                        macro_analysis,
                        modes,
                        req,
                        &symbol,
                        now_ms,
                    )
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(symbol = %symbol, error = %e, "symbol evaluation failed");
                            SymbolOutcome::Skipped(SkipReason::Error(e.to_string()))
                        }
                    };
                    (idx, symbol, outcome)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
    outcomes.sort_by_key(|(idx, _, _)| *idx);

    let mut winners: Vec<Candidate> = Vec::new();
    let mut skips = BTreeMap::new();
    for (_, symbol, outcome) in outcomes {
        match outcome {
            SymbolOutcome::Triggered(candidate) => winners.push(*candidate),
            SymbolOutcome::Skipped(reason) => {
                debug!(symbol = %symbol, reason = %reason, "symbol skipped");
                skips.insert(symbol, reason.label());
            }
        }
    }

    let driver_tf = req
        .driver_tf
        .or_else(|| winners.first().map(|c| c.mode.detection_tf()))
        .unwrap_or_else(|| modes[0].detection_tf());

    // -- Side effects --------------------------------------------------------
    let message = if winners.is_empty() {
        None
    } else {
        Some(render::render_message(
            driver_tf,
            req.force,
            req.dry,
            now_ms,
            &winners,
            &cfg.dash_url,
            &cfg.macro_btc_symbol,
            cfg.scalp_sweep_lookback,
        ))
    };

    let mut notify_error: Option<String> = None;
    if let Some(text) = &message {
        for candidate in &winners {
            if let Err(e) = commit_winner(&writer, candidate, now_ms).await {
                warn!(symbol = %candidate.view.symbol, error = %e, "failed to write alert state");
            }
        }

        if req.dry {
            info!(
                triggered = winners.len(),
                "dry-run — notification suppressed"
            );
        } else if let Err(e) = state.notifier.send(text).await {
            warn!(error = %e, "notifier delivery failed");
            notify_error = Some(e.to_string());
        } else {
            info!(triggered = winners.len(), chars = text.len(), "alert sent");
        }
    }

    let sent = !winners.is_empty() && !req.dry && notify_error.is_none();
    let triggered_symbols: Vec<String> =
        winners.iter().map(|c| c.view.symbol.clone()).collect();

    // -- Heartbeat -----------------------------------------------------------
    let at = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let heartbeat = serde_json::json!({
        "run_id": &run_id,
        "ts": now_ms,
        "at": at,
        "modes": modes.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
        "force": req.force,
        "dry": req.dry,
        "evaluated": req.symbols.len(),
        "triggered_count": winners.len(),
        "triggered": &triggered_symbols,
        "sent": sent,
        "skips": &skips,
        "telegram_failed": notify_error.is_some(),
        "source_counters": state.counters.snapshot(),
    });

    if let Err(e) = writer
        .put(
            &cfg.heartbeat_key,
            &heartbeat.to_string(),
            Some(Duration::from_secs(cfg.heartbeat_ttl_seconds)),
        )
        .await
    {
        warn!(error = %e, "failed to write heartbeat");
    }

    EvalReport {
        run_id,
        ts: now_ms,
        sent,
        triggered_count: winners.len(),
        evaluated: req.symbols.len(),
        driver_tf,
        modes,
        force: req.force,
        dry: req.dry,
        triggered_symbols,
        skips,
        macro_analysis,
        message,
        heartbeat,
        notify_error,
    }
}

/// Post-gate state writes for one winner: cooldown marker plus the state
/// update (the detection gate already seeded the same value, but a winner
/// commits it alongside `lastSentAt`).
async fn commit_winner(
    writer: &StateWriter,
    candidate: &Candidate,
    now_ms: i64,
) -> anyhow::Result<()> {
    let inst = &candidate.view.inst_id;

    writer
        .put(&keys::alert_last_sent_at(inst), &now_ms.to_string(), None)
        .await?;
    writer
        .put(
            &keys::alert_last_state(candidate.mode, inst),
            candidate.detection_state.as_str(),
            None,
        )
        .await?;
    if candidate.mode != Mode::Scalp {
        writer
            .put(
                &keys::alert_last_state_15m(inst),
                candidate.detection_state.as_str(),
                None,
            )
            .await?;
    }
    Ok(())
}

// =============================================================================
// Per-symbol pipeline
// =============================================================================

#[allow(clippy::too_many_arguments)]
async fn evaluate_symbol(
    store: &dyn KvStore,
    writer: &StateWriter,
    state: &AppState,
    cfg: &GatewayConfig,
    macro_analysis: &MacroAnalysis,
    modes: &[Mode],
    req: &EvalRequest,
    symbol: &str,
    now_ms: i64,
) -> anyhow::Result<SymbolOutcome> {
    let view = match derive::derive_view(
        store,
        writer,
        &state.counters,
        symbol,
        now_ms,
        cfg.scalp_sweep_lookback,
    )
    .await?
    {
        DeriveOutcome::Ready(view) => *view,
        DeriveOutcome::SnapshotMissing { .. } => {
            return Ok(SymbolOutcome::Skipped(SkipReason::SnapshotMissing))
        }
        DeriveOutcome::NoInstrument => {
            return Ok(SymbolOutcome::Skipped(SkipReason::NoInstrument))
        }
    };

    let mut last_reason = SkipReason::NoDetectionTrigger;

    for &mode in modes {
        // Detection gate. Seeds state regardless of the verdict.
        let det = detection::run(store, writer, cfg, mode, &view).await?;
        if det.trigger.is_none() && !req.force {
            last_reason = SkipReason::NoDetectionTrigger;
            continue;
        }

        // Cooldown gate (per instrument, shared across modes).
        if !req.force {
            if let Some(remaining) =
                gates::cooldown_remaining(store, &view.inst_id, now_ms, cfg.cooldown_ms()).await?
            {
                debug!(symbol, remaining_ms = remaining, "cooldown active");
                last_reason = SkipReason::Cooldown;
                continue;
            }
        }

        // Warmup gate on 1h levels.
        let Some(levels) = view.levels_1h.clone() else {
            last_reason = SkipReason::MissingLevelsOrPrice;
            continue;
        };
        if levels.warmup && !(req.force && cfg.force_bypass_warmup) {
            last_reason = SkipReason::WarmupGate1h;
            continue;
        }
        if view.price <= 0.0 || levels.hi - levels.lo <= 0.0 {
            last_reason = SkipReason::MissingLevelsOrPrice;
            continue;
        }

        // Bias.
        let bias = entry::determine_bias(mode, &view);
        if bias == Lean::Neutral {
            last_reason = SkipReason::NeutralBias;
            continue;
        }

        // Macro gate (bias-dependent, so it runs after bias resolution).
        if gates::macro_blocks(macro_analysis, cfg, symbol, bias) {
            last_reason = SkipReason::MacroBlockBtcBullExpansion;
            continue;
        }

        // Structural edge + per-mode entry validity.
        let b1 = entry::evaluate_b1(&view, &levels, bias, cfg);
        match entry::validate(mode, &view, &levels, bias, &b1, cfg) {
            Ok(exec_reason) => {
                let confidence = confidence::grade(&view, bias, exec_reason, &b1, cfg);
                let leverage = leverage::advisory(&view, &levels, bias, req.risk_profile, cfg);

                info!(
                    symbol,
                    mode = %mode,
                    bias = %bias,
                    exec = %exec_reason,
                    grade = %confidence,
                    "candidate triggered"
                );

                return Ok(SymbolOutcome::Triggered(Box::new(Candidate {
                    detection_state: det.current_state,
                    view,
                    mode,
                    bias,
                    exec_reason,
                    b1,
                    levels_1h: levels,
                    confidence,
                    leverage,
                })));
            }
            Err(reason) => {
                last_reason = reason;
                continue;
            }
        }
    }

    Ok(SymbolOutcome::Skipped(last_reason))
}

// =============================================================================
// Tests — boundary scenarios against the in-memory ports
// =============================================================================
