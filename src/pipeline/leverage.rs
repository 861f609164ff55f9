// =============================================================================
// Advisory Leverage — copy-only sizing band
// =============================================================================
//
// base = floor(risk_budget_pct / distance_to_invalidation_pct) where the
// invalidation is the 1h low (long) or high (short). The base is scaled
// down for positioning instability (max |oiΔ| of 5m/15m) and funding
// magnitude with two-tier multipliers, capped, and returned as a band
// (low = half, high = full). Never consulted by any gate.

use serde::Serialize;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::derive::{DerivedView, LevelsRecord};
use crate::types::{Lean, RiskProfile, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeverageBand {
    pub low: u32,
    pub high: u32,
}

/// Compute the advisory band for a winning candidate. `None` when leverage
/// advice is disabled or the invalidation distance is degenerate.
pub fn advisory(
    view: &DerivedView,
    levels: &LevelsRecord,
    bias: Lean,
    profile: RiskProfile,
    cfg: &GatewayConfig,
) -> Option<LeverageBand> {
    if !cfg.leverage_enabled {
        return None;
    }

    let price = view.price;
    if price <= 0.0 {
        return None;
    }

    let invalidation = match bias {
        Lean::Long => levels.lo,
        Lean::Short => levels.hi,
        Lean::Neutral => return None,
    };

    let distance_pct = (price - invalidation).abs() / price * 100.0;
    if distance_pct <= 0.0 {
        return None;
    }

    let base = (profile.risk_budget_pct() / distance_pct).floor();
    if base < 1.0 {
        return None;
    }

    // Instability: the larger of the short-horizon OI swings.
    let oi_5m = view.delta(Timeframe::M5).oi_change_pct.unwrap_or(0.0).abs();
    let oi_15m = view.delta(Timeframe::M15).oi_change_pct.unwrap_or(0.0).abs();
    let instability = oi_5m.max(oi_15m);

    let instability_mult = if instability >= cfg.leverage_instability_high_pct {
        0.6
    } else if instability >= cfg.leverage_instability_warn_pct {
        0.75
    } else {
        1.0
    };

    let funding_abs = view.funding_rate.unwrap_or(0.0).abs();
    let funding_mult = if funding_abs >= cfg.leverage_funding_high {
        0.6
    } else if funding_abs >= cfg.leverage_funding_warn {
        0.75
    } else {
        1.0
    };

    let adj = (base * instability_mult * funding_mult).floor() as u32;
    let adj = adj.clamp(1, cfg.leverage_max_cap);

    let band = LeverageBand {
        low: (adj / 2).max(1),
        high: adj,
    };

    debug!(
        symbol = %view.symbol,
        distance_pct,
        base,
        instability,
        funding_abs,
        low = band.low,
        high = band.high,
        "advisory leverage computed"
    );

    Some(band)
}

// =============================================================================
// Tests
// =============================================================================
