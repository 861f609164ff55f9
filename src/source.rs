// =============================================================================
// Market Source Port — per-instrument price / funding / open interest
// =============================================================================
//
// The ingestor is the only component allowed to call this port. The
// derivation engine runs snapshot-only and proves it with the debug
// counters in AppState.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One observation of a perpetual instrument. Fields beyond `ts` and
/// `price` may be absent when the upstream payload is missing or
/// unparseable — absent, never zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketQuote {
    /// Observation timestamp (UTC epoch ms).
    pub ts: i64,

    /// Last traded price.
    pub price: f64,

    /// Current funding rate as a decimal (e.g. 0.0001 = 0.01%).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_rate: Option<f64>,

    /// Open interest in contracts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_interest_contracts: Option<f64>,
}

/// Upstream exchange client for one instrument at a time.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Fetch the current quote for a canonical instrument id
    /// (e.g. `ETH-USDT-SWAP`). Price is mandatory; funding and open
    /// interest are best-effort.
    async fn quote(&self, inst_id: &str) -> Result<MarketQuote>;

    /// Fetch the full SWAP instrument listing (canonical instrument ids).
    async fn swap_instruments(&self) -> Result<Vec<String>>;
}
