// =============================================================================
// Entry Validity — bias, structural edge (B1), per-mode price triggers
// =============================================================================
//
// Bias per mode:
//   scalp  ->  5m lean
//   swing  ->  1h lean, falling back 15m -> 5m while neutral
//   build  ->  4h lean, falling back 1h -> 15m -> 5m while neutral
//
// The edge band is `EDGE_PCT × (hi − lo)` of the 1h range. A reversal entry
// must sit inside the band on the bias side; a breakout entry sits at or
// beyond the opposite extreme. A 4h contraction regime widens the band.

use serde::Serialize;

use crate::config::GatewayConfig;
use crate::derive::{DeltaRecord, DerivedView, LevelsRecord};
use crate::series::{recent_high, recent_low};
use crate::types::{Lean, Mode, Timeframe};

use super::SkipReason;

// =============================================================================
// Execution reason
// =============================================================================

/// Why an entry is valid right now. Rendered verbatim into the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecReason {
    LongBreakout,
    ShortBreakdown,
    LongSweepReclaim,
    ShortSweepReject,
    LongBreak,
    ShortBreak,
    LongReversal,
    ShortReversal,
}

impl ExecReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LongBreakout => "long_breakout",
            Self::ShortBreakdown => "short_breakdown",
            Self::LongSweepReclaim => "long_sweep_reclaim",
            Self::ShortSweepReject => "short_sweep_reject",
            Self::LongBreak => "long_break",
            Self::ShortBreak => "short_break",
            Self::LongReversal => "long_reversal",
            Self::ShortReversal => "short_reversal",
        }
    }

    /// Sweep-reclaims/rejects and reversal-path entries count as confirmed
    /// reversals for the confidence grade.
    pub fn reversal_confirmed(self) -> bool {
        matches!(
            self,
            Self::LongSweepReclaim | Self::ShortSweepReject | Self::LongReversal | Self::ShortReversal
        )
    }

    /// Pure break entries with no reversal evidence.
    pub fn breakout_only(self) -> bool {
        matches!(
            self,
            Self::LongBreakout | Self::ShortBreakdown | Self::LongBreak | Self::ShortBreak
        )
    }
}

impl std::fmt::Display for ExecReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Bias
// =============================================================================

/// Mode-specific aggregate lean driving entry direction.
pub fn determine_bias(mode: Mode, view: &DerivedView) -> Lean {
    let chain: &[Timeframe] = match mode {
        Mode::Scalp => &[Timeframe::M5],
        Mode::Swing => &[Timeframe::H1, Timeframe::M15, Timeframe::M5],
        Mode::Build => &[Timeframe::H4, Timeframe::H1, Timeframe::M15, Timeframe::M5],
    };

    for tf in chain {
        let lean = view.delta(*tf).lean;
        if lean != Lean::Neutral {
            return lean;
        }
    }
    Lean::Neutral
}

// =============================================================================
// Structural edge (B1)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum B1Strength {
    Strong,
    Weak,
}

/// Result of the proximity-to-structural-extreme filter on the 1h range.
#[derive(Debug, Clone, Serialize)]
pub struct B1Result {
    /// Price sits in the reversal band on the bias side (§ band formula).
    pub in_band: bool,

    /// Price sits at either structural edge (reversal band or beyond the
    /// opposite extreme) — the scalp proximity requirement.
    pub at_edge: bool,

    /// Band width in price units (after any regime widening).
    pub edge: f64,

    /// True when the contraction hook widened the band.
    pub widened: bool,

    pub strength: B1Strength,
}

/// Directional band membership per the edge-band formula: long passes at or
/// below `lo + edge`, short at or above `hi − edge`.
pub fn in_band(bias: Lean, price: f64, levels: &LevelsRecord, edge: f64) -> bool {
    match bias {
        Lean::Long => price <= levels.lo + edge,
        Lean::Short => price >= levels.hi - edge,
        Lean::Neutral => false,
    }
}

/// True when the 4h range shows low absolute price change and strongly
/// negative OI change — a contraction that justifies a wider edge band.
pub fn regime_contraction(delta_4h: &DeltaRecord, cfg: &GatewayConfig) -> bool {
    if !cfg.regime_enabled {
        return false;
    }
    match (delta_4h.price_change_pct, delta_4h.oi_change_pct) {
        (Some(pd), Some(od)) => {
            pd.abs() <= cfg.regime_contraction_price_max && od <= cfg.regime_contraction_oi_max
        }
        _ => false,
    }
}

/// True when the 4h regime is a strong expansion in `direction`.
pub fn strong_expansion(delta_4h: &DeltaRecord, direction: Lean, cfg: &GatewayConfig) -> bool {
    if !cfg.regime_enabled || delta_4h.lean != direction {
        return false;
    }
    match (delta_4h.price_change_pct, delta_4h.oi_change_pct) {
        (Some(pd), Some(od)) => {
            let pd = match direction {
                Lean::Long => pd,
                Lean::Short => -pd,
                Lean::Neutral => return false,
            };
            pd >= cfg.regime_expansion_price_min && od >= cfg.regime_expansion_oi_min
        }
        _ => false,
    }
}

/// Evaluate B1 for one candidate direction.
pub fn evaluate_b1(
    view: &DerivedView,
    levels: &LevelsRecord,
    bias: Lean,
    cfg: &GatewayConfig,
) -> B1Result {
    let mut edge = cfg.edge_pct_1h * (levels.hi - levels.lo);
    let mut widened = false;

    let delta_4h = view.delta(Timeframe::H4);
    if regime_contraction(delta_4h, cfg) {
        edge *= cfg.regime_contraction_band_mult;
        widened = true;
    }

    let price = view.price;
    let band = in_band(bias, price, levels, edge);
    let at_edge = price <= levels.lo + edge || price >= levels.hi - edge;

    // A strong B1 is demoted when the 4h regime expands hard against the
    // bias (e.g. bull expansion while shorting).
    let mut strength = if at_edge {
        B1Strength::Strong
    } else {
        B1Strength::Weak
    };
    if strength == B1Strength::Strong && strong_expansion(delta_4h, bias.opposite(), cfg) {
        strength = B1Strength::Weak;
    }

    B1Result {
        in_band: band,
        at_edge,
        edge,
        widened,
        strength,
    }
}

// =============================================================================
// Per-mode entry validity
// =============================================================================

/// Validate the entry for `mode` in the `bias` direction. Returns the
/// execution reason, or the skip reason of the first failing requirement.
pub fn validate(
    mode: Mode,
    view: &DerivedView,
    levels: &LevelsRecord,
    bias: Lean,
    b1: &B1Result,
    cfg: &GatewayConfig,
) -> Result<ExecReason, SkipReason> {
    match mode {
        Mode::Scalp => scalp_entry(view, levels, bias, b1, cfg),
        Mode::Swing | Mode::Build => swing_entry(view, levels, bias, b1, cfg),
    }
}

/// Scalp is strict: price at a structural edge, a breakout or
/// sweep-and-reclaim trigger, and fresh 15m OI.
fn scalp_entry(
    view: &DerivedView,
    levels: &LevelsRecord,
    bias: Lean,
    b1: &B1Result,
    cfg: &GatewayConfig,
) -> Result<ExecReason, SkipReason> {
    if !b1.at_edge {
        return Err(SkipReason::NotAtEdge);
    }

    let price = view.price;
    let lookback = cfg.scalp_sweep_lookback;

    let reason = match bias {
        Lean::Long => {
            if price > levels.hi {
                ExecReason::LongBreakout
            } else if recent_low(&view.points, lookback).is_some_and(|lo| lo < levels.lo)
                && price > levels.lo
            {
                ExecReason::LongSweepReclaim
            } else {
                return Err(SkipReason::NoPriceTrigger);
            }
        }
        Lean::Short => {
            if price < levels.lo {
                ExecReason::ShortBreakdown
            } else if recent_high(&view.points, lookback).is_some_and(|hi| hi > levels.hi)
                && price < levels.hi
            {
                ExecReason::ShortSweepReject
            } else {
                return Err(SkipReason::NoPriceTrigger);
            }
        }
        Lean::Neutral => return Err(SkipReason::NeutralBias),
    };

    // Strict OI confirmation on 15m.
    let oi_15m = view.delta(Timeframe::M15).oi_change_pct;
    if !oi_15m.is_some_and(|oi| oi >= cfg.shock_oi_min) {
        return Err(SkipReason::OiNotConfirmed);
    }

    Ok(reason)
}

/// Swing/build allow two paths: a range break, or an in-band reversal with
/// a 5m micro-confirm. Both reject when 15m OI is sharply counter-trend.
fn swing_entry(
    view: &DerivedView,
    levels: &LevelsRecord,
    bias: Lean,
    b1: &B1Result,
    cfg: &GatewayConfig,
) -> Result<ExecReason, SkipReason> {
    // OI context: absent OI cannot prove a counter-trend, so only a present
    // value below the floor rejects.
    if view
        .delta(Timeframe::M15)
        .oi_change_pct
        .is_some_and(|oi| oi < cfg.swing_min_oi_pct)
    {
        return Err(SkipReason::OiCounterTrend);
    }

    let price = view.price;
    let p5 = view.delta(Timeframe::M5).price_change_pct;

    match bias {
        Lean::Long => {
            if price > levels.hi {
                return Ok(ExecReason::LongBreak);
            }
            if b1.in_band && p5.is_some_and(|pd| pd >= cfg.swing_reversal_min_5m) {
                return Ok(ExecReason::LongReversal);
            }
        }
        Lean::Short => {
            if price < levels.lo {
                return Ok(ExecReason::ShortBreak);
            }
            if b1.in_band && p5.is_some_and(|pd| pd <= -cfg.swing_reversal_min_5m) {
                return Ok(ExecReason::ShortReversal);
            }
        }
        Lean::Neutral => return Err(SkipReason::NeutralBias),
    }

    Err(SkipReason::NoEntryTrigger)
}

// =============================================================================
// Tests
// =============================================================================
