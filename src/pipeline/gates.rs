// =============================================================================
// Cooldown & Macro Gates
// =============================================================================
//
// Cooldown is per instrument and shared across modes: at most one
// notification per instrument per window, regardless of which mode wins.
//
// The macro gate reads the BTC 4h delta once per invocation. BTC is in
// bull expansion iff its 4h lean is long and both priceΔ and oiΔ clear the
// configured floors; while that holds, shorts on non-BTC symbols are
// denied. The inverse (bear expansion blocking longs) is deliberately not
// part of the contract.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::derive::DerivedView;
use crate::store::{keys, KvStore};
use crate::types::{Lean, Timeframe};

// =============================================================================
// Cooldown
// =============================================================================

/// Milliseconds remaining in the cooldown window, or `None` when clear.
pub async fn cooldown_remaining(
    store: &dyn KvStore,
    inst: &str,
    now_ms: i64,
    cooldown_ms: i64,
) -> Result<Option<i64>> {
    let Some(raw) = store.get(&keys::alert_last_sent_at(inst)).await? else {
        return Ok(None);
    };

    let Ok(last_sent) = raw.trim().parse::<i64>() else {
        // Unreadable marker cannot hold the gate shut.
        return Ok(None);
    };

    let elapsed = now_ms - last_sent;
    if elapsed < cooldown_ms {
        Ok(Some(cooldown_ms - elapsed))
    } else {
        Ok(None)
    }
}

// =============================================================================
// Macro analysis
// =============================================================================

/// BTC 4h risk read, computed once per evaluator invocation and shared by
/// every symbol pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct MacroAnalysis {
    pub enabled: bool,
    pub btc_symbol: String,

    /// False when the BTC snapshot/series was unavailable this tick.
    pub available: bool,

    pub bull_expansion: bool,
    pub lean_4h: Lean,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_change_pct_4h: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oi_change_pct_4h: Option<f64>,
}

impl MacroAnalysis {
    pub fn disabled(cfg: &GatewayConfig) -> Self {
        Self {
            enabled: false,
            btc_symbol: cfg.macro_btc_symbol.clone(),
            available: false,
            bull_expansion: false,
            lean_4h: Lean::Neutral,
            price_change_pct_4h: None,
            oi_change_pct_4h: None,
        }
    }

    pub fn unavailable(cfg: &GatewayConfig) -> Self {
        Self {
            enabled: true,
            ..Self::disabled(cfg)
        }
    }
}

/// Analyze the BTC 4h delta for bull expansion.
pub fn analyze_macro(cfg: &GatewayConfig, btc_view: Option<&DerivedView>) -> MacroAnalysis {
    if !cfg.macro_enabled {
        return MacroAnalysis::disabled(cfg);
    }
    let Some(view) = btc_view else {
        return MacroAnalysis::unavailable(cfg);
    };

    let delta = view.delta(Timeframe::H4);
    let bull_expansion = delta.lean == Lean::Long
        && delta
            .price_change_pct
            .is_some_and(|pd| pd >= cfg.macro_btc_4h_price_min)
        && delta
            .oi_change_pct
            .is_some_and(|oi| oi >= cfg.macro_btc_4h_oi_min);

    debug!(
        bull_expansion,
        lean = %delta.lean,
        price_change_pct = ?delta.price_change_pct,
        oi_change_pct = ?delta.oi_change_pct,
        "macro analysis"
    );

    MacroAnalysis {
        enabled: true,
        btc_symbol: cfg.macro_btc_symbol.clone(),
        available: true,
        bull_expansion,
        lean_4h: delta.lean,
        price_change_pct_4h: delta.price_change_pct,
        oi_change_pct_4h: delta.oi_change_pct,
    }
}

/// Whether the macro gate denies this candidate.
pub fn macro_blocks(
    analysis: &MacroAnalysis,
    cfg: &GatewayConfig,
    symbol: &str,
    bias: Lean,
) -> bool {
    analysis.enabled
        && cfg.macro_block_shorts
        && analysis.bull_expansion
        && bias == Lean::Short
        && symbol != cfg.macro_btc_symbol
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil::view_builder;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn cooldown_window_math() {
        let store = MemoryStore::new();
        let now = 1_700_000_000_000i64;
        let cooldown = 20 * 60_000;

        // No marker: clear.
        assert_eq!(
            cooldown_remaining(&store, "ETH-USDT-SWAP", now, cooldown)
                .await
                .unwrap(),
            None
        );

        // Sent 10 minutes ago: 10 minutes remain.
        store
            .put(
                "alert:lastSentAt:ETH-USDT-SWAP",
                &(now - 10 * 60_000).to_string(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            cooldown_remaining(&store, "ETH-USDT-SWAP", now, cooldown)
                .await
                .unwrap(),
            Some(10 * 60_000)
        );

        // Sent exactly one window ago: clear.
        store
            .put(
                "alert:lastSentAt:ETH-USDT-SWAP",
                &(now - cooldown).to_string(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            cooldown_remaining(&store, "ETH-USDT-SWAP", now, cooldown)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn garbage_marker_does_not_hold_the_gate() {
        let store = MemoryStore::new();
        store
            .put("alert:lastSentAt:ETH-USDT-SWAP", "not-a-number", None)
            .await
            .unwrap();
        assert_eq!(
            cooldown_remaining(&store, "ETH-USDT-SWAP", 0, 1_200_000)
                .await
                .unwrap(),
            None
        );
    }

    #[test]
    fn bull_expansion_needs_all_three_conditions() {
        let cfg = GatewayConfig::default();

        let view = view_builder("BTCUSDT")
            .delta(Timeframe::H4, Some(2.4), Some(0.8))
            .build();
        assert!(analyze_macro(&cfg, Some(&view)).bull_expansion);

        // Price below floor.
        let view = view_builder("BTCUSDT")
            .delta(Timeframe::H4, Some(1.5), Some(0.8))
            .build();
        assert!(!analyze_macro(&cfg, Some(&view)).bull_expansion);

        // OI below floor.
        let view = view_builder("BTCUSDT")
            .delta(Timeframe::H4, Some(2.4), Some(0.2))
            .build();
        assert!(!analyze_macro(&cfg, Some(&view)).bull_expansion);

        // Short lean (price down, OI up) can never be bull expansion.
        let view = view_builder("BTCUSDT")
            .delta(Timeframe::H4, Some(-2.4), Some(0.8))
            .build();
        assert!(!analyze_macro(&cfg, Some(&view)).bull_expansion);
    }

    #[test]
    fn block_applies_to_non_btc_shorts_only() {
        let cfg = GatewayConfig::default();
        let view = view_builder("BTCUSDT")
            .delta(Timeframe::H4, Some(2.4), Some(0.8))
            .build();
        let analysis = analyze_macro(&cfg, Some(&view));

        assert!(macro_blocks(&analysis, &cfg, "ETHUSDT", Lean::Short));
        assert!(!macro_blocks(&analysis, &cfg, "ETHUSDT", Lean::Long));
        assert!(!macro_blocks(&analysis, &cfg, "BTCUSDT", Lean::Short));
    }

    #[test]
    fn disabled_or_unavailable_macro_never_blocks() {
        let mut cfg = GatewayConfig::default();
        cfg.macro_enabled = false;
        let analysis = analyze_macro(&cfg, None);
        assert!(!macro_blocks(&analysis, &cfg, "ETHUSDT", Lean::Short));

        let cfg = GatewayConfig::default();
        let analysis = analyze_macro(&cfg, None);
        assert!(analysis.enabled);
        assert!(!analysis.available);
        assert!(!macro_blocks(&analysis, &cfg, "ETHUSDT", Lean::Short));
    }
}
