// =============================================================================
// Shared types used across the gateway
// =============================================================================
//
// Classification of a (priceΔ, oiΔ) pair into a market state:
//
//   priceΔ > 0, oiΔ > 0   =>  longs opening   (lean long)
//   priceΔ < 0, oiΔ > 0   =>  shorts opening  (lean short)
//   priceΔ > 0, oiΔ <= 0  =>  shorts closing  (lean long)
//   priceΔ < 0, oiΔ <= 0  =>  longs closing   (lean short)
//   either missing        =>  unknown         (lean neutral)

use serde::{Deserialize, Serialize};

// =============================================================================
// Trading mode
// =============================================================================

/// Trading mode the evaluation pipeline runs under. Modes are evaluated in
/// priority order; the first mode whose pipeline passes wins the symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Scalp,
    Swing,
    Build,
}

/// Fixed evaluation order: scalp beats swing beats build.
pub const MODE_PRIORITY: [Mode; 3] = [Mode::Scalp, Mode::Swing, Mode::Build];

impl Mode {
    /// Timeframe whose state drives the detection gate for this mode.
    pub fn detection_tf(self) -> Timeframe {
        match self {
            Self::Scalp => Timeframe::M5,
            Self::Swing | Self::Build => Timeframe::M15,
        }
    }

    /// Rank used for winner selection (lower wins).
    pub fn priority(self) -> usize {
        match self {
            Self::Scalp => 0,
            Self::Swing => 1,
            Self::Build => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scalp => "scalp",
            Self::Swing => "swing",
            Self::Build => "build",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "scalp" => Some(Self::Scalp),
            "swing" => Some(Self::Swing),
            "build" => Some(Self::Build),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Delta timeframes derived from the 5-minute series. The step count is the
/// number of buckets between the two points a delta is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
}

/// All derived timeframes, shortest first.
pub const TIMEFRAMES: [Timeframe; 5] = [
    Timeframe::M5,
    Timeframe::M15,
    Timeframe::M30,
    Timeframe::H1,
    Timeframe::H4,
];

impl Timeframe {
    /// Bucket distance between the two series points of this delta.
    pub fn steps(self) -> usize {
        match self {
            Self::M5 => 1,
            Self::M15 => 3,
            Self::M30 => 6,
            Self::H1 => 12,
            Self::H4 => 48,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            "30m" => Some(Self::M30),
            "1h" => Some(Self::H1),
            "4h" => Some(Self::H4),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Market state & lean
// =============================================================================

/// Discrete positioning state of one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    LongsOpening,
    ShortsOpening,
    ShortsClosing,
    LongsClosing,
    Unknown,
}

impl MarketState {
    /// Stable string form — this is what gets persisted under
    /// `alert:lastState:*` so it must never change shape.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LongsOpening => "longs_opening",
            Self::ShortsOpening => "shorts_opening",
            Self::ShortsClosing => "shorts_closing",
            Self::LongsClosing => "longs_closing",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "longs_opening" => Some(Self::LongsOpening),
            "shorts_opening" => Some(Self::ShortsOpening),
            "shorts_closing" => Some(Self::ShortsClosing),
            "longs_closing" => Some(Self::LongsClosing),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for MarketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directional interpretation of a market state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lean {
    Long,
    Short,
    Neutral,
}

impl Lean {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
            Self::Neutral => "neutral",
        }
    }

    /// Flip long <-> short; neutral stays neutral.
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
            Self::Neutral => Self::Neutral,
        }
    }
}

impl std::fmt::Display for Lean {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a (priceΔ%, oiΔ%) pair per the table at the top of this file.
///
/// A price delta of exactly zero falls into the downward branch, matching
/// the strict `> 0` test of the table.
pub fn classify(price_change_pct: Option<f64>, oi_change_pct: Option<f64>) -> (MarketState, Lean) {
    let (pd, od) = match (price_change_pct, oi_change_pct) {
        (Some(p), Some(o)) => (p, o),
        _ => return (MarketState::Unknown, Lean::Neutral),
    };

    if pd > 0.0 {
        if od > 0.0 {
            (MarketState::LongsOpening, Lean::Long)
        } else {
            (MarketState::ShortsClosing, Lean::Long)
        }
    } else if od > 0.0 {
        (MarketState::ShortsOpening, Lean::Short)
    } else {
        (MarketState::LongsClosing, Lean::Short)
    }
}

// =============================================================================
// Risk profile
// =============================================================================

/// Risk appetite selected per request (or via config default). Only feeds
/// the advisory leverage band — never gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    Balanced,
    Aggressive,
}

impl RiskProfile {
    /// Risk budget in percent of equity used as the leverage numerator.
    pub fn risk_budget_pct(self) -> f64 {
        match self {
            Self::Conservative => 1.0,
            Self::Balanced => 2.0,
            Self::Aggressive => 3.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "conservative" => Some(Self::Conservative),
            "balanced" => Some(Self::Balanced),
            "aggressive" => Some(Self::Aggressive),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_follows_the_quadrant_table() {
        assert_eq!(
            classify(Some(0.5), Some(0.5)),
            (MarketState::LongsOpening, Lean::Long)
        );
        assert_eq!(
            classify(Some(-0.5), Some(0.5)),
            (MarketState::ShortsOpening, Lean::Short)
        );
        assert_eq!(
            classify(Some(0.5), Some(-0.5)),
            (MarketState::ShortsClosing, Lean::Long)
        );
        assert_eq!(
            classify(Some(-0.5), Some(-0.5)),
            (MarketState::LongsClosing, Lean::Short)
        );
        assert_eq!(
            classify(Some(0.5), Some(0.0)),
            (MarketState::ShortsClosing, Lean::Long)
        );
    }

    #[test]
    fn classify_missing_inputs_is_unknown_neutral() {
        assert_eq!(classify(None, Some(1.0)), (MarketState::Unknown, Lean::Neutral));
        assert_eq!(classify(Some(1.0), None), (MarketState::Unknown, Lean::Neutral));
        assert_eq!(classify(None, None), (MarketState::Unknown, Lean::Neutral));
    }

    #[test]
    fn market_state_string_roundtrip() {
        for state in [
            MarketState::LongsOpening,
            MarketState::ShortsOpening,
            MarketState::ShortsClosing,
            MarketState::LongsClosing,
            MarketState::Unknown,
        ] {
            assert_eq!(MarketState::parse(state.as_str()), Some(state));
        }
        assert_eq!(MarketState::parse("bogus"), None);
    }

    #[test]
    fn detection_timeframes_per_mode() {
        assert_eq!(Mode::Scalp.detection_tf(), Timeframe::M5);
        assert_eq!(Mode::Swing.detection_tf(), Timeframe::M15);
        assert_eq!(Mode::Build.detection_tf(), Timeframe::M15);
    }

    #[test]
    fn timeframe_steps() {
        assert_eq!(Timeframe::M5.steps(), 1);
        assert_eq!(Timeframe::M15.steps(), 3);
        assert_eq!(Timeframe::M30.steps(), 6);
        assert_eq!(Timeframe::H1.steps(), 12);
        assert_eq!(Timeframe::H4.steps(), 48);
    }

    #[test]
    fn mode_parsing_is_case_insensitive() {
        assert_eq!(Mode::parse("SCALP"), Some(Mode::Scalp));
        assert_eq!(Mode::parse(" swing "), Some(Mode::Swing));
        assert_eq!(Mode::parse("hodl"), None);
    }
}
