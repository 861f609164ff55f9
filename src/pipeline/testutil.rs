// =============================================================================
// Test fixtures for the gating pipeline
// =============================================================================

#![allow(dead_code)]

use std::collections::HashMap;

use crate::derive::{DeltaRecord, DerivedView, LevelsRecord};
use crate::okx::instruments::{base_of, canonical_inst_id};
use crate::series::SeriesPoint;
use crate::types::{classify, Lean, MarketState, Timeframe, TIMEFRAMES};

/// Builder for a hand-crafted [`DerivedView`].
pub struct ViewBuilder {
    symbol: String,
    price: f64,
    funding_rate: Option<f64>,
    deltas: HashMap<Timeframe, DeltaRecord>,
    levels_1h: Option<LevelsRecord>,
    levels_4h: Option<LevelsRecord>,
    points: Vec<SeriesPoint>,
}

pub fn view_builder(symbol: &str) -> ViewBuilder {
    let deltas = TIMEFRAMES
        .into_iter()
        .map(|tf| (tf, quiet_delta(tf)))
        .collect();

    ViewBuilder {
        symbol: symbol.to_string(),
        price: 100.0,
        funding_rate: None,
        deltas,
        levels_1h: None,
        levels_4h: None,
        points: Vec::new(),
    }
}

fn quiet_delta(tf: Timeframe) -> DeltaRecord {
    DeltaRecord {
        tf,
        price_change_pct: None,
        oi_change_pct: None,
        funding_change: None,
        state: MarketState::Unknown,
        lean: Lean::Neutral,
        warmup: false,
    }
}

fn levels(lo: f64, hi: f64, warmup: bool) -> LevelsRecord {
    LevelsRecord {
        warmup,
        hi,
        lo,
        mid: (hi + lo) / 2.0,
    }
}

impl ViewBuilder {
    pub fn price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn funding(mut self, rate: Option<f64>) -> Self {
        self.funding_rate = rate;
        self
    }

    /// Set a timeframe's delta; state and lean follow the classify table.
    pub fn delta(mut self, tf: Timeframe, price_pct: Option<f64>, oi_pct: Option<f64>) -> Self {
        let (state, lean) = classify(price_pct, oi_pct);
        self.deltas.insert(
            tf,
            DeltaRecord {
                tf,
                price_change_pct: price_pct,
                oi_change_pct: oi_pct,
                funding_change: None,
                state,
                lean,
                warmup: false,
            },
        );
        self
    }

    pub fn levels_1h(mut self, lo: f64, hi: f64) -> Self {
        self.levels_1h = Some(levels(lo, hi, false));
        self
    }

    pub fn levels_1h_warmup(mut self, lo: f64, hi: f64) -> Self {
        self.levels_1h = Some(levels(lo, hi, true));
        self
    }

    pub fn levels_4h(mut self, lo: f64, hi: f64) -> Self {
        self.levels_4h = Some(levels(lo, hi, false));
        self
    }

    /// Set the trailing series prices (newest last).
    pub fn recent_points(mut self, prices: &[f64]) -> Self {
        self.points = prices
            .iter()
            .enumerate()
            .map(|(i, &p)| SeriesPoint {
                b: 1000 + i as i64,
                ts: (1000 + i as i64) * 300_000,
                p,
                fr: None,
                oi: None,
            })
            .collect();
        self
    }

    pub fn build(self) -> DerivedView {
        let inst_id = base_of(&self.symbol)
            .map(canonical_inst_id)
            .unwrap_or_else(|| format!("{}-SWAP", self.symbol));

        DerivedView {
            symbol: self.symbol,
            inst_id,
            bucket: 1000,
            price: self.price,
            snapshot_ts: 1000 * 300_000,
            funding_rate: self.funding_rate,
            deltas: self.deltas,
            levels_1h: self.levels_1h,
            levels_4h: self.levels_4h,
            points: self.points,
        }
    }
}
