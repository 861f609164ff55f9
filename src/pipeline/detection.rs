// =============================================================================
// Detection Gate — cheap pre-filter before the full pipeline
// =============================================================================
//
// Three trigger types on the mode's detection timeframe (5m for scalp,
// 15m for swing/build):
//
//   setup_flip         stored state exists and differs from the current one
//   momentum_confirm   |5m priceΔ| >= MOMENTUM_MIN (lean-agnostic)
//   positioning_shock  on 5m or 15m: oiΔ >= SHOCK_OI_MIN OR |priceΔ| >=
//                      SHOCK_PRICE_MIN (loosened: OR, not AND)
//
// Whether or not a trigger fires, the current state is seeded so a later
// genuine flip is detectable in quiet regimes. Seeding goes through the
// write handle and therefore vanishes under dry-run.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::derive::DerivedView;
use crate::store::{keys, KvStore, StateWriter};
use crate::types::{MarketState, Mode, Timeframe};

/// Which pre-filter fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionTrigger {
    SetupFlip,
    MomentumConfirm,
    PositioningShock,
}

#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub trigger: Option<DetectionTrigger>,
    pub current_state: MarketState,
    pub previous_state: Option<MarketState>,
}

/// Evaluate the detection gate for one mode and seed the stored state.
pub async fn run(
    store: &dyn KvStore,
    writer: &StateWriter,
    cfg: &GatewayConfig,
    mode: Mode,
    view: &DerivedView,
) -> Result<DetectionOutcome> {
    let tf = mode.detection_tf();
    let current = view.delta(tf).state;

    let state_key = keys::alert_last_state(mode, &view.inst_id);
    let previous = store
        .get(&state_key)
        .await?
        .as_deref()
        .and_then(MarketState::parse);

    let trigger = first_trigger(cfg, view, current, previous);

    // Seed unconditionally (no-op under dry-run), mirroring into the legacy
    // 15m key for non-scalp modes.
    writer.put(&state_key, current.as_str(), None).await?;
    if mode != Mode::Scalp {
        writer
            .put(
                &keys::alert_last_state_15m(&view.inst_id),
                current.as_str(),
                None,
            )
            .await?;
    }

    debug!(
        symbol = %view.symbol,
        mode = %mode,
        tf = %tf,
        current = %current,
        previous = ?previous.map(MarketState::as_str),
        trigger = ?trigger,
        "detection gate evaluated"
    );

    Ok(DetectionOutcome {
        trigger,
        current_state: current,
        previous_state: previous,
    })
}

fn first_trigger(
    cfg: &GatewayConfig,
    view: &DerivedView,
    current: MarketState,
    previous: Option<MarketState>,
) -> Option<DetectionTrigger> {
    if previous.is_some_and(|prev| prev != current) {
        return Some(DetectionTrigger::SetupFlip);
    }

    if view
        .delta(Timeframe::M5)
        .price_change_pct
        .is_some_and(|pd| pd.abs() >= cfg.momentum_min)
    {
        return Some(DetectionTrigger::MomentumConfirm);
    }

    for tf in [Timeframe::M5, Timeframe::M15] {
        let delta = view.delta(tf);
        let oi_shock = delta.oi_change_pct.is_some_and(|oi| oi >= cfg.shock_oi_min);
        let price_shock = delta
            .price_change_pct
            .is_some_and(|pd| pd.abs() >= cfg.shock_price_min);
        if oi_shock || price_shock {
            return Some(DetectionTrigger::PositioningShock);
        }
    }

    None
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil::view_builder;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn wet(store: &Arc<MemoryStore>) -> StateWriter {
        StateWriter::new(store.clone() as Arc<dyn KvStore>, false)
    }

    #[tokio::test]
    async fn quiet_market_seeds_without_triggering() {
        let store = Arc::new(MemoryStore::new());
        let writer = wet(&store);
        let cfg = GatewayConfig::default();

        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M5, Some(0.01), Some(0.05))
            .delta(Timeframe::M15, Some(0.02), Some(0.05))
            .build();

        let out = run(store.as_ref(), &writer, &cfg, Mode::Swing, &view)
            .await
            .unwrap();
        assert_eq!(out.trigger, None);

        // Seeded anyway, with the 15m mirror for a non-scalp mode.
        assert_eq!(
            store
                .get("alert:lastState:swing:ETH-USDT-SWAP")
                .await
                .unwrap()
                .as_deref(),
            Some("longs_opening")
        );
        assert_eq!(
            store
                .get("alert:lastState15m:ETH-USDT-SWAP")
                .await
                .unwrap()
                .as_deref(),
            Some("longs_opening")
        );
    }

    #[tokio::test]
    async fn scalp_does_not_mirror() {
        let store = Arc::new(MemoryStore::new());
        let writer = wet(&store);
        let cfg = GatewayConfig::default();

        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M5, Some(0.01), Some(0.05))
            .build();

        run(store.as_ref(), &writer, &cfg, Mode::Scalp, &view)
            .await
            .unwrap();

        assert!(store
            .get("alert:lastState:scalp:ETH-USDT-SWAP")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get("alert:lastState15m:ETH-USDT-SWAP")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn setup_flip_fires_on_state_change() {
        let store = Arc::new(MemoryStore::new());
        let writer = wet(&store);
        let cfg = GatewayConfig::default();

        store
            .put("alert:lastState:swing:ETH-USDT-SWAP", "shorts_opening", None)
            .await
            .unwrap();

        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M5, Some(0.01), Some(0.05))
            .delta(Timeframe::M15, Some(0.02), Some(0.05)) // longs_opening
            .build();

        let out = run(store.as_ref(), &writer, &cfg, Mode::Swing, &view)
            .await
            .unwrap();
        assert_eq!(out.trigger, Some(DetectionTrigger::SetupFlip));
        assert_eq!(out.previous_state, Some(MarketState::ShortsOpening));

        // Re-seeded with the new state: an immediate re-run has no flip.
        let out = run(store.as_ref(), &writer, &cfg, Mode::Swing, &view)
            .await
            .unwrap();
        assert_eq!(out.trigger, None);
    }

    #[tokio::test]
    async fn momentum_confirm_ignores_lean() {
        let store = Arc::new(MemoryStore::new());
        let writer = wet(&store);
        let cfg = GatewayConfig::default();

        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M5, Some(-0.12), Some(0.05)) // |Δ| >= 0.10
            .build();

        let out = run(store.as_ref(), &writer, &cfg, Mode::Scalp, &view)
            .await
            .unwrap();
        assert_eq!(out.trigger, Some(DetectionTrigger::MomentumConfirm));
    }

    #[tokio::test]
    async fn loosened_shock_is_or_not_and() {
        let store = Arc::new(MemoryStore::new());
        let writer = wet(&store);
        let cfg = GatewayConfig::default();

        // OI shock alone on 15m, price flat everywhere.
        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M5, Some(0.01), Some(0.05))
            .delta(Timeframe::M15, Some(0.01), Some(0.60))
            .build();
        let out = run(store.as_ref(), &writer, &cfg, Mode::Swing, &view)
            .await
            .unwrap();
        assert_eq!(out.trigger, Some(DetectionTrigger::PositioningShock));

        // Price shock alone on 15m, OI flat.
        let view = view_builder("SOLUSDT")
            .delta(Timeframe::M5, Some(0.01), Some(0.05))
            .delta(Timeframe::M15, Some(-0.25), Some(0.05))
            .build();
        let out = run(store.as_ref(), &writer, &cfg, Mode::Swing, &view)
            .await
            .unwrap();
        assert_eq!(out.trigger, Some(DetectionTrigger::PositioningShock));
    }

    #[tokio::test]
    async fn dry_run_does_not_seed() {
        let store = Arc::new(MemoryStore::new());
        let dry = StateWriter::new(store.clone() as Arc<dyn KvStore>, true);
        let cfg = GatewayConfig::default();

        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M5, Some(0.5), Some(0.5))
            .build();

        run(store.as_ref(), &dry, &cfg, Mode::Swing, &view)
            .await
            .unwrap();

        assert!(store
            .get("alert:lastState:swing:ETH-USDT-SWAP")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get("alert:lastState15m:ETH-USDT-SWAP")
            .await
            .unwrap()
            .is_none());
    }
}
