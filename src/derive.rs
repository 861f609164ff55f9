// =============================================================================
// Derivation Engine — multi-timeframe deltas and structural levels
// =============================================================================
//
// Snapshot-only: the engine reads the current bucket's snapshot, advances
// the rolling series, and derives per-timeframe deltas plus 1h/4h levels.
// It never calls the market source; the counters below prove it (market
// calls must stay zero).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::bucket::bucket_of;
use crate::okx::instruments;
use crate::series::{self, SeriesPoint};
use crate::snapshot::SnapshotPoint;
use crate::store::{keys, KvStore, StateWriter};
use crate::types::{classify, Lean, MarketState, Timeframe, TIMEFRAMES};

/// Points needed for 1h structural levels.
const LEVELS_1H_LOOKBACK: usize = 12;
/// Points needed for 4h structural levels.
const LEVELS_4H_LOOKBACK: usize = 48;

// =============================================================================
// Proof counters
// =============================================================================

/// Counters proving the engine's data source. Exposed in the debug payload.
#[derive(Debug, Default)]
pub struct DeriveCounters {
    pub snapshot_hits: AtomicU64,
    pub snapshot_misses: AtomicU64,
    pub market_calls: AtomicU64,
}

impl DeriveCounters {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "snapshot_hits": self.snapshot_hits.load(Ordering::Relaxed),
            "snapshot_misses": self.snapshot_misses.load(Ordering::Relaxed),
            "market_calls": self.market_calls.load(Ordering::Relaxed),
        })
    }
}

// =============================================================================
// Derived records
// =============================================================================

/// Delta between the newest series point and the point `steps` buckets back.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaRecord {
    pub tf: Timeframe,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_change_pct: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oi_change_pct: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_change: Option<f64>,

    pub state: MarketState,
    pub lean: Lean,

    /// True when the series is shorter than `steps + 1`.
    pub warmup: bool,
}

impl DeltaRecord {
    fn warmup(tf: Timeframe) -> Self {
        Self {
            tf,
            price_change_pct: None,
            oi_change_pct: None,
            funding_change: None,
            state: MarketState::Unknown,
            lean: Lean::Neutral,
            warmup: true,
        }
    }
}

/// Structural range over the trailing window of a timeframe.
#[derive(Debug, Clone, Serialize)]
pub struct LevelsRecord {
    pub warmup: bool,
    pub hi: f64,
    pub lo: f64,
    pub mid: f64,
}

/// Everything the gating pipeline needs for one symbol, derived in one pass.
#[derive(Debug, Clone)]
pub struct DerivedView {
    pub symbol: String,
    pub inst_id: String,
    pub bucket: i64,
    pub price: f64,
    pub snapshot_ts: i64,
    pub funding_rate: Option<f64>,
    pub deltas: HashMap<Timeframe, DeltaRecord>,
    pub levels_1h: Option<LevelsRecord>,
    pub levels_4h: Option<LevelsRecord>,
    /// Trailing series (≤288 points), newest last. Used by the sweep checks.
    pub points: Vec<SeriesPoint>,
}

impl DerivedView {
    pub fn delta(&self, tf: Timeframe) -> &DeltaRecord {
        &self.deltas[&tf]
    }
}

/// Outcome of deriving one symbol.
#[derive(Debug)]
pub enum DeriveOutcome {
    Ready(Box<DerivedView>),
    /// The ingestor has not written this bucket (or the symbol failed there).
    SnapshotMissing { inst_id: String },
    /// The symbol has no perpetual market.
    NoInstrument,
}

// =============================================================================
// Entry point
// =============================================================================

/// Derive the view for `symbol` at `now_ms`.
///
/// Series writes flow through `writer` so dry evaluations cannot persist;
/// snapshot reads bump the proof counters.
///
/// `structure_gap` is the number of trailing points excluded from the
/// structural-level windows. A structural extreme must predate the points
/// that pierce it: with the tail included, `price > hi` and
/// `recent min < lo` could never hold.
pub async fn derive_view(
    store: &dyn KvStore,
    writer: &StateWriter,
    counters: &DeriveCounters,
    symbol: &str,
    now_ms: i64,
    structure_gap: usize,
) -> Result<DeriveOutcome> {
    let Some(inst_id) = instruments::resolve_cached(store, symbol).await? else {
        return Ok(DeriveOutcome::NoInstrument);
    };

    let bucket = bucket_of(now_ms);
    let Some(raw) = store.get(&keys::snap(&inst_id, bucket)).await? else {
        counters.snapshot_misses.fetch_add(1, Ordering::Relaxed);
        debug!(symbol, inst_id = %inst_id, bucket, "snapshot missing");
        return Ok(DeriveOutcome::SnapshotMissing { inst_id });
    };
    counters.snapshot_hits.fetch_add(1, Ordering::Relaxed);

    let snap: SnapshotPoint = serde_json::from_str(&raw)?;

    let (points, appended) = series::advance(store, writer, &inst_id, bucket, &snap).await?;
    debug!(
        symbol,
        inst_id = %inst_id,
        bucket,
        appended,
        series_len = points.len(),
        "series advanced"
    );

    let mut deltas = HashMap::with_capacity(TIMEFRAMES.len());
    for tf in TIMEFRAMES {
        deltas.insert(tf, compute_delta(&points, tf));
    }

    // Levels come from the window preceding the recent tail (at least the
    // current bucket is excluded).
    let cut = points.len().saturating_sub(structure_gap.max(1));
    let levels_1h = compute_levels(&points[..cut], LEVELS_1H_LOOKBACK);
    let levels_4h = compute_levels(&points[..cut], LEVELS_4H_LOOKBACK);

    Ok(DeriveOutcome::Ready(Box::new(DerivedView {
        symbol: symbol.to_string(),
        inst_id,
        bucket,
        price: snap.price,
        snapshot_ts: snap.ts,
        funding_rate: snap.funding_rate,
        deltas,
        levels_1h,
        levels_4h,
        points,
    })))
}

// =============================================================================
// Delta & levels computation
// =============================================================================

/// Delta from the last point and the point `steps` positions earlier.
pub fn compute_delta(points: &[SeriesPoint], tf: Timeframe) -> DeltaRecord {
    let k = tf.steps();
    if points.len() < k + 1 {
        return DeltaRecord::warmup(tf);
    }

    let last = &points[points.len() - 1];
    let prev = &points[points.len() - 1 - k];

    let price_change_pct = if prev.p > 0.0 {
        Some((last.p - prev.p) / prev.p * 100.0)
    } else {
        None
    };

    let oi_change_pct = match (last.oi, prev.oi) {
        (Some(now), Some(then)) if then > 0.0 => Some((now - then) / then * 100.0),
        _ => None,
    };

    let funding_change = match (last.fr, prev.fr) {
        (Some(now), Some(then)) => Some(now - then),
        _ => None,
    };

    let (state, lean) = classify(price_change_pct, oi_change_pct);

    DeltaRecord {
        tf,
        price_change_pct,
        oi_change_pct,
        funding_change,
        state,
        lean,
        warmup: false,
    }
}

/// Structural levels over the trailing `lookback` points. `None` only when
/// the series is empty; `warmup` flags a window shorter than `lookback`.
pub fn compute_levels(points: &[SeriesPoint], lookback: usize) -> Option<LevelsRecord> {
    if points.is_empty() {
        return None;
    }

    let start = points.len().saturating_sub(lookback);
    let window = &points[start..];

    let mut hi = f64::MIN;
    let mut lo = f64::MAX;
    for pt in window {
        hi = hi.max(pt.p);
        lo = lo.min(pt.p);
    }

    Some(LevelsRecord {
        warmup: points.len() < lookback,
        hi,
        lo,
        mid: (hi + lo) / 2.0,
    })
}

// =============================================================================
// Price formatting
// =============================================================================

/// Render a price with tick-appropriate precision: ≥1000 → 2 dp,
/// ≥1 → 3 dp, else 4 dp.
pub fn format_price(p: f64) -> String {
    if p >= 1000.0 {
        format!("{p:.2}")
    } else if p >= 1.0 {
        format!("{p:.3}")
    } else {
        format!("{p:.4}")
    }
}

// =============================================================================
// Tests
// =============================================================================
