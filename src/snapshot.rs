// =============================================================================
// Ingestor — one snapshot per instrument per 5-minute bucket
// =============================================================================
//
// The sole caller of the market source. Each tick it resolves every
// configured symbol, fetches (price, funding, open interest) and writes the
// bucket cell with put-if-absent: a second call in the same bucket leaves
// the value fixed at the first successful observation.
//
// Per-symbol failures are isolated — one bad symbol never blocks the rest
// of the batch. The ingestor never writes alert state and never notifies.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bucket::bucket_of;
use crate::okx::instruments;
use crate::source::MarketSource;
use crate::store::{keys, KvStore, SNAP_TTL};

/// Concurrent upstream fetches per batch.
const INGEST_CONCURRENCY: usize = 4;

// =============================================================================
// Data model
// =============================================================================

/// One 5-minute observation as persisted under `snap5m:{inst}:{bucket}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPoint {
    /// Observation timestamp (UTC epoch ms).
    pub ts: i64,

    /// Last traded price.
    pub price: f64,

    /// Funding rate as a decimal; absent when unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_rate: Option<f64>,

    /// Open interest in contracts; absent when unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest_contracts: Option<f64>,
}

/// Per-symbol outcome inside a batch.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolResult {
    pub symbol: String,
    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<i64>,

    /// True when this call performed the first write of the bucket cell.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotPoint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SymbolResult {
    fn failed(symbol: &str, error: impl std::fmt::Display) -> Self {
        Self {
            symbol: symbol.to_string(),
            ok: false,
            inst_id: None,
            bucket: None,
            written: None,
            snapshot: None,
            error: Some(error.to_string()),
        }
    }
}

/// Result of one ingestor invocation.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotBatch {
    pub ok: bool,
    pub ts: i64,
    pub symbols: Vec<String>,
    pub results: Vec<SymbolResult>,
}

// =============================================================================
// Entry point
// =============================================================================

/// Run one ingestor tick over `symbols` at `now_ms`.
pub async fn run_snapshot(
    store: Arc<dyn KvStore>,
    source: Arc<dyn MarketSource>,
    symbols: &[String],
    now_ms: i64,
) -> SnapshotBatch {
    let results: Vec<SymbolResult> = stream::iter(symbols.iter().cloned())
        .map(|symbol| {
            let store = store.clone();
            let source = source.clone();
            async move {
                match ingest_symbol(store.as_ref(), source.as_ref(), &symbol, now_ms).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "snapshot ingest failed");
                        SymbolResult::failed(&symbol, e)
                    }
                }
            }
        })
        .buffer_unordered(INGEST_CONCURRENCY)
        .collect()
        .await;

    let ok_count = results.iter().filter(|r| r.ok).count();
    info!(
        total = results.len(),
        ok = ok_count,
        bucket = bucket_of(now_ms),
        "snapshot batch complete"
    );

    SnapshotBatch {
        ok: true,
        ts: now_ms,
        symbols: symbols.to_vec(),
        results,
    }
}

/// Resolve, fetch and write one symbol.
async fn ingest_symbol(
    store: &dyn KvStore,
    source: &dyn MarketSource,
    symbol: &str,
    now_ms: i64,
) -> Result<SymbolResult> {
    let inst_id = instruments::resolve(store, source, symbol)
        .await?
        .with_context(|| format!("no perpetual market for {symbol}"))?;

    let quote = source
        .quote(&inst_id)
        .await
        .with_context(|| format!("quote fetch failed for {inst_id}"))?;

    let point = SnapshotPoint {
        ts: now_ms,
        price: quote.price,
        funding_rate: quote.funding_rate,
        open_interest_contracts: quote.open_interest_contracts,
    };

    let bucket = bucket_of(now_ms);
    let key = keys::snap(&inst_id, bucket);
    let payload = serde_json::to_string(&point).context("failed to serialize snapshot point")?;

    let written = store.put_if_absent(&key, &payload, Some(SNAP_TTL)).await?;
    if written {
        debug!(symbol, inst_id = %inst_id, bucket, price = point.price, "snapshot written");
    } else {
        debug!(symbol, inst_id = %inst_id, bucket, "bucket already written — kept first observation");
    }

    Ok(SymbolResult {
        symbol: symbol.to_string(),
        ok: true,
        inst_id: Some(inst_id),
        bucket: Some(bucket),
        written: Some(written),
        snapshot: Some(point),
        error: None,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MarketQuote;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Market source with canned quotes per instrument.
    struct FakeSource {
        quotes: Mutex<HashMap<String, MarketQuote>>,
        listing: Vec<String>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                quotes: Mutex::new(HashMap::new()),
                listing: vec!["ETH-USDT-SWAP".into(), "BTC-USDT-SWAP".into()],
            }
        }

        fn set_quote(&self, inst: &str, price: f64, fr: Option<f64>, oi: Option<f64>) {
            self.quotes.lock().insert(
                inst.to_string(),
                MarketQuote {
                    ts: 0,
                    price,
                    funding_rate: fr,
                    open_interest_contracts: oi,
                },
            );
        }
    }

    #[async_trait]
    impl MarketSource for FakeSource {
        async fn quote(&self, inst_id: &str) -> anyhow::Result<MarketQuote> {
            self.quotes
                .lock()
                .get(inst_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no quote for {inst_id}"))
        }

        async fn swap_instruments(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.listing.clone())
        }
    }

    const NOW: i64 = 1_700_000_100_000;

    #[tokio::test]
    async fn writes_one_snapshot_per_bucket() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let source = Arc::new(FakeSource::new());
        source.set_quote("ETH-USDT-SWAP", 1988.0, Some(0.0001), Some(1_000_000.0));

        let symbols = vec!["ETHUSDT".to_string()];
        let batch = run_snapshot(store.clone(), source.clone(), &symbols, NOW).await;
        assert!(batch.ok);
        assert!(batch.results[0].ok);
        assert_eq!(batch.results[0].written, Some(true));

        let key = keys::snap("ETH-USDT-SWAP", bucket_of(NOW));
        let stored: SnapshotPoint =
            serde_json::from_str(&store.get(&key).await.unwrap().unwrap()).unwrap();
        assert_eq!(stored.price, 1988.0);

        // Second run in the same bucket: price moved, but the cell keeps the
        // first observation.
        source.set_quote("ETH-USDT-SWAP", 2001.0, None, None);
        let batch = run_snapshot(store.clone(), source, &symbols, NOW + 200_000).await;
        assert_eq!(batch.results[0].written, Some(false));

        let stored: SnapshotPoint =
            serde_json::from_str(&store.get(&key).await.unwrap().unwrap()).unwrap();
        assert_eq!(stored.price, 1988.0);
    }

    #[tokio::test]
    async fn failed_symbol_does_not_block_others() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let source = Arc::new(FakeSource::new());
        source.set_quote("BTC-USDT-SWAP", 60_000.0, None, None);
        // ETH quote intentionally missing.

        let symbols = vec!["ETHUSDT".to_string(), "BTCUSDT".to_string()];
        let batch = run_snapshot(store.clone(), source, &symbols, NOW).await;

        let eth = batch.results.iter().find(|r| r.symbol == "ETHUSDT").unwrap();
        let btc = batch.results.iter().find(|r| r.symbol == "BTCUSDT").unwrap();
        assert!(!eth.ok);
        assert!(eth.error.is_some());
        assert!(btc.ok);

        let key = keys::snap("BTC-USDT-SWAP", bucket_of(NOW));
        assert!(store.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_symbol_is_a_per_symbol_error() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let source = Arc::new(FakeSource::new());

        let symbols = vec!["DOGEUSDT".to_string()];
        let batch = run_snapshot(store, source, &symbols, NOW).await;
        assert!(!batch.results[0].ok);
        assert!(batch.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("no perpetual market"));
    }

    #[test]
    fn snapshot_point_absent_fields_stay_absent() {
        let point = SnapshotPoint {
            ts: 1,
            price: 2.0,
            funding_rate: None,
            open_interest_contracts: None,
        };
        let json = serde_json::to_string(&point).unwrap();
        assert!(!json.contains("funding_rate"));
        assert!(!json.contains("open_interest_contracts"));

        let parsed: SnapshotPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.funding_rate, None);
        assert_eq!(parsed.open_interest_contracts, None);
    }
}
