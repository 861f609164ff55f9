// =============================================================================
// Confidence Grading — mechanical A/B/C classification
// =============================================================================
//
//   A:  strong B1, confirmed reversal, 15m OI aligned, 1h lean aligned
//   B:  strong B1, confirmed reversal, 15m OI neutral
//   C:  everything else (including every pure breakout)

use serde::Serialize;

use crate::config::GatewayConfig;
use crate::derive::DerivedView;
use crate::types::{Lean, Timeframe};

use super::entry::{B1Result, B1Strength, ExecReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    A,
    B,
    C,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grade one winning candidate.
pub fn grade(
    view: &DerivedView,
    bias: Lean,
    exec: ExecReason,
    b1: &B1Result,
    cfg: &GatewayConfig,
) -> Grade {
    let b1_strong = b1.strength == B1Strength::Strong;
    let reversal_confirmed = exec.reversal_confirmed();

    let delta_15m = view.delta(Timeframe::M15);
    let oi_aligned = delta_15m.lean == bias;
    let oi_neutral = delta_15m.lean == Lean::Neutral
        || delta_15m
            .oi_change_pct
            .is_some_and(|oi| oi.abs() < cfg.shock_oi_min);

    let one_hour_aligned = view.delta(Timeframe::H1).lean == bias;

    if b1_strong && reversal_confirmed && oi_aligned && one_hour_aligned {
        Grade::A
    } else if b1_strong && reversal_confirmed && oi_neutral {
        Grade::B
    } else {
        Grade::C
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil::view_builder;

    fn strong_b1() -> B1Result {
        B1Result {
            in_band: true,
            at_edge: true,
            edge: 9.0,
            widened: false,
            strength: B1Strength::Strong,
        }
    }

    fn weak_b1() -> B1Result {
        B1Result {
            strength: B1Strength::Weak,
            ..strong_b1()
        }
    }

    #[test]
    fn grade_a_needs_full_alignment() {
        let cfg = GatewayConfig::default();
        // 15m longs opening, 1h longs opening: everything aligned long.
        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M15, Some(0.4), Some(0.8))
            .delta(Timeframe::H1, Some(0.9), Some(1.0))
            .build();

        assert_eq!(
            grade(&view, Lean::Long, ExecReason::LongReversal, &strong_b1(), &cfg),
            Grade::A
        );
    }

    #[test]
    fn grade_b_on_neutral_oi() {
        let cfg = GatewayConfig::default();
        // 15m OI change below the shock floor: neutral context.
        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M15, Some(0.4), Some(0.2))
            .delta(Timeframe::H1, Some(-0.9), Some(1.0)) // counter 1h lean
            .build();

        assert_eq!(
            grade(&view, Lean::Long, ExecReason::LongSweepReclaim, &strong_b1(), &cfg),
            Grade::B
        );
    }

    #[test]
    fn breakouts_never_exceed_c() {
        let cfg = GatewayConfig::default();
        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M15, Some(0.4), Some(0.8))
            .delta(Timeframe::H1, Some(0.9), Some(1.0))
            .build();

        assert_eq!(
            grade(&view, Lean::Long, ExecReason::LongBreakout, &strong_b1(), &cfg),
            Grade::C
        );
        assert_eq!(
            grade(&view, Lean::Long, ExecReason::LongBreak, &strong_b1(), &cfg),
            Grade::C
        );
    }

    #[test]
    fn weak_b1_never_exceeds_c() {
        let cfg = GatewayConfig::default();
        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M15, Some(0.4), Some(0.8))
            .delta(Timeframe::H1, Some(0.9), Some(1.0))
            .build();

        assert_eq!(
            grade(&view, Lean::Long, ExecReason::LongReversal, &weak_b1(), &cfg),
            Grade::C
        );
    }

    #[test]
    fn counter_trend_oi_is_not_neutral() {
        let cfg = GatewayConfig::default();
        // 15m shorts opening (lean short) with a large OI move: neither
        // aligned nor neutral for a long candidate.
        let view = view_builder("ETHUSDT")
            .delta(Timeframe::M15, Some(-0.4), Some(0.9))
            .delta(Timeframe::H1, Some(0.9), Some(1.0))
            .build();

        assert_eq!(
            grade(&view, Lean::Long, ExecReason::LongReversal, &strong_b1(), &cfg),
            Grade::C
        );
    }
}
