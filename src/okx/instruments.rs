// =============================================================================
// Instrument Resolution — {BASE}USDT symbols to canonical SWAP instrument ids
// =============================================================================
//
// External symbol form `ETHUSDT` maps to the canonical id `ETH-USDT-SWAP`.
// Resolution is memoized in the KV store for 24 h; a `__NONE__` sentinel is
// memoized for bases with no perpetual market so a bad watchlist entry
// cannot cause a refetch storm. The full listing itself is cached for 12 h.
//
// The evaluator never resolves through the market source: it uses the memo
// or falls back to the canonical guess, keeping the derivation engine
// snapshot-only.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::source::MarketSource;
use crate::store::{keys, KvStore, INSTMAP_TTL, LISTING_TTL, NO_INSTRUMENT};

/// Extract the base asset from a `{BASE}USDT` symbol. Returns `None` for
/// symbols that do not carry the USDT suffix (or are nothing but it).
pub fn base_of(symbol: &str) -> Option<&str> {
    let upper_ok = symbol.chars().all(|c| c.is_ascii_alphanumeric());
    let base = symbol.strip_suffix("USDT")?;
    if base.is_empty() || !upper_ok {
        return None;
    }
    Some(base)
}

/// The canonical SWAP instrument id for a base asset.
pub fn canonical_inst_id(base: &str) -> String {
    format!("{base}-USDT-SWAP")
}

/// Resolve a symbol through the memo only — no market calls, no memo
/// writes. Absent memo falls back to the canonical guess. Used by the
/// evaluator.
pub async fn resolve_cached(store: &dyn KvStore, symbol: &str) -> Result<Option<String>> {
    let Some(base) = base_of(symbol) else {
        return Ok(None);
    };

    match store.get(&keys::inst_map(base)).await? {
        Some(memo) if memo == NO_INSTRUMENT => Ok(None),
        Some(memo) => Ok(Some(memo)),
        None => Ok(Some(canonical_inst_id(base))),
    }
}

/// Full resolution for the ingestor: memo, then listing scan, memoizing
/// both positive and negative results.
///
/// If the listing cannot be fetched the canonical guess is returned but not
/// memoized, so a transient upstream failure never poisons the memo.
pub async fn resolve(
    store: &dyn KvStore,
    source: &dyn MarketSource,
    symbol: &str,
) -> Result<Option<String>> {
    let base = base_of(symbol)
        .with_context(|| format!("symbol '{symbol}' is not a USDT perpetual symbol"))?;

    let memo_key = keys::inst_map(base);
    match store.get(&memo_key).await? {
        Some(memo) if memo == NO_INSTRUMENT => return Ok(None),
        Some(memo) => return Ok(Some(memo)),
        None => {}
    }

    let candidate = canonical_inst_id(base);

    let listing = match cached_listing(store, source).await {
        Ok(listing) => listing,
        Err(e) => {
            warn!(symbol, error = %e, "instrument listing unavailable — using canonical guess");
            return Ok(Some(candidate));
        }
    };

    if listing.iter().any(|id| id == &candidate) {
        store.put(&memo_key, &candidate, Some(INSTMAP_TTL)).await?;
        debug!(symbol, inst_id = %candidate, "instrument resolved and memoized");
        Ok(Some(candidate))
    } else {
        store
            .put(&memo_key, NO_INSTRUMENT, Some(INSTMAP_TTL))
            .await?;
        warn!(symbol, "no SWAP market listed — memoized negative result");
        Ok(None)
    }
}

/// Listing cache: KV first (12 h TTL), market source on miss.
async fn cached_listing(store: &dyn KvStore, source: &dyn MarketSource) -> Result<Vec<String>> {
    if let Some(raw) = store.get(keys::INSTRUMENT_LISTING).await? {
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(listing) => return Ok(listing),
            Err(e) => warn!(error = %e, "cached instrument listing unreadable — refetching"),
        }
    }

    let listing = source.swap_instruments().await?;
    let raw = serde_json::to_string(&listing).context("failed to serialize instrument listing")?;
    store
        .put(keys::INSTRUMENT_LISTING, &raw, Some(LISTING_TTL))
        .await?;
    Ok(listing)
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
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeSource {
        listing: anyhow::Result<Vec<String>>,
        listing_calls: AtomicU64,
    }

    impl FakeSource {
        fn with_listing(ids: &[&str]) -> Self {
            Self {
                listing: Ok(ids.iter().map(|s| s.to_string()).collect()),
                listing_calls: AtomicU64::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                listing: Err(anyhow::anyhow!("listing endpoint down")),
                listing_calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl MarketSource for FakeSource {
        async fn quote(&self, _inst_id: &str) -> anyhow::Result<MarketQuote> {
            anyhow::bail!("quote not available in this test")
        }

        async fn swap_instruments(&self) -> anyhow::Result<Vec<String>> {
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            match &self.listing {
                Ok(ids) => Ok(ids.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    #[test]
    fn base_extraction() {
        assert_eq!(base_of("ETHUSDT"), Some("ETH"));
        assert_eq!(base_of("1000PEPEUSDT"), Some("1000PEPE"));
        assert_eq!(base_of("USDT"), None);
        assert_eq!(base_of("ETH-USD"), None);
    }

    #[tokio::test]
    async fn positive_resolution_is_memoized() {
        let store = MemoryStore::new();
        let source = FakeSource::with_listing(&["ETH-USDT-SWAP", "BTC-USDT-SWAP"]);

        let id = resolve(&store, &source, "ETHUSDT").await.unwrap();
        assert_eq!(id.as_deref(), Some("ETH-USDT-SWAP"));
        assert_eq!(
            store.get("instmap:swap:ETH").await.unwrap().as_deref(),
            Some("ETH-USDT-SWAP")
        );

        // Second resolve hits the memo, not the listing.
        let id = resolve(&store, &source, "ETHUSDT").await.unwrap();
        assert_eq!(id.as_deref(), Some("ETH-USDT-SWAP"));
        assert_eq!(source.listing_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn negative_resolution_memoizes_sentinel() {
        let store = MemoryStore::new();
        let source = FakeSource::with_listing(&["BTC-USDT-SWAP"]);

        let id = resolve(&store, &source, "DOGEUSDT").await.unwrap();
        assert_eq!(id, None);
        assert_eq!(
            store.get("instmap:swap:DOGE").await.unwrap().as_deref(),
            Some(NO_INSTRUMENT)
        );

        // Cached negative result short-circuits without another listing call.
        let id = resolve(&store, &source, "DOGEUSDT").await.unwrap();
        assert_eq!(id, None);
        assert_eq!(source.listing_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listing_failure_guesses_without_memoizing() {
        let store = MemoryStore::new();
        let source = FakeSource::failing();

        let id = resolve(&store, &source, "ETHUSDT").await.unwrap();
        assert_eq!(id.as_deref(), Some("ETH-USDT-SWAP"));
        assert_eq!(store.get("instmap:swap:ETH").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cached_resolution_never_touches_the_source() {
        let store = MemoryStore::new();

        // Unmemoized base falls back to the canonical guess.
        let id = resolve_cached(&store, "SOLUSDT").await.unwrap();
        assert_eq!(id.as_deref(), Some("SOL-USDT-SWAP"));

        // Negative memo is honoured.
        store
            .put("instmap:swap:XYZ", NO_INSTRUMENT, None)
            .await
            .unwrap();
        assert_eq!(resolve_cached(&store, "XYZUSDT").await.unwrap(), None);
    }
}
