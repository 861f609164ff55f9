// =============================================================================
// Key-Value Store Port — snapshots, rolling series, alert state
// =============================================================================
//
// The gateway's only shared mutable resource. Each key has exactly one
// logical writer: the ingestor owns `snap5m:*` and the instrument caches,
// the derivation engine owns `series5m:*` / `lastBucket:*`, and the
// evaluator owns `alert:*` plus the heartbeat.
//
// All values are UTF-8 strings (JSON blobs, state labels, or integers in
// decimal form). TTLs are advisory: a backend may expire lazily, but a `get`
// must never return an expired value.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryStore;

// =============================================================================
// TTL policy
// =============================================================================

/// Snapshot cells live one day.
pub const SNAP_TTL: Duration = Duration::from_secs(24 * 3600);
/// Rolling series and its bucket cursor live two days.
pub const SERIES_TTL: Duration = Duration::from_secs(48 * 3600);
/// Instrument-id memo (positive or `__NONE__`).
pub const INSTMAP_TTL: Duration = Duration::from_secs(24 * 3600);
/// Full SWAP instrument listing cache.
pub const LISTING_TTL: Duration = Duration::from_secs(12 * 3600);

/// Sentinel memoized for bases with no perpetual market.
pub const NO_INSTRUMENT: &str = "__NONE__";

// =============================================================================
// Port
// =============================================================================

/// Async key-value store with per-key expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value; `None` for absent or expired keys.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any existing one. `ttl: None` means the key
    /// never expires.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write only if the key is absent (or expired). Returns `true` when the
    /// write happened.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

// =============================================================================
// Key layout
// =============================================================================

/// Builders for every key the gateway reads or writes. Centralised so the
/// layout table stays in one place.
pub mod keys {
    use crate::types::Mode;

    /// One snapshot per instrument per 5-minute bucket.
    pub fn snap(inst: &str, bucket: i64) -> String {
        format!("snap5m:{inst}:{bucket}")
    }

    /// Rolling 24 h series, JSON array of series points.
    pub fn series(inst: &str) -> String {
        format!("series5m:{inst}")
    }

    /// Last bucket appended to the series (first-write-per-bucket gate).
    pub fn last_bucket(inst: &str) -> String {
        format!("lastBucket:{inst}")
    }

    /// Memoized `{BASE}USDT -> {BASE}-USDT-SWAP` mapping (or `__NONE__`).
    pub fn inst_map(base: &str) -> String {
        format!("instmap:swap:{base}")
    }

    /// Cached full SWAP instrument listing.
    pub const INSTRUMENT_LISTING: &str = "okx:instruments:swap:list:v1";

    /// Last observed detection-timeframe state, per mode per instrument.
    pub fn alert_last_state(mode: Mode, inst: &str) -> String {
        format!("alert:lastState:{}:{inst}", mode.as_str())
    }

    /// Legacy mirror kept for non-scalp modes.
    pub fn alert_last_state_15m(inst: &str) -> String {
        format!("alert:lastState15m:{inst}")
    }

    /// Epoch-ms of the last notification, shared across modes.
    pub fn alert_last_sent_at(inst: &str) -> String {
        format!("alert:lastSentAt:{inst}")
    }

    /// Default heartbeat key (overridable via config).
    pub const DEFAULT_HEARTBEAT: &str = "alert:lastRun";
}

// =============================================================================
// Dry-run write handle
// =============================================================================

/// Write capability threaded through the derivation and evaluation engines.
///
/// When constructed with `dry = true` every write becomes a logged no-op, so
/// a dry invocation cannot mutate state on any exit path — there is no
/// try/finally safety net anywhere else.
#[derive(Clone)]
pub struct StateWriter {
    store: Arc<dyn KvStore>,
    dry: bool,
}

impl StateWriter {
    pub fn new(store: Arc<dyn KvStore>, dry: bool) -> Self {
        Self { store, dry }
    }

    pub async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        if self.dry {
            tracing::debug!(key, "dry-run: suppressed put");
            return Ok(());
        }
        self.store.put(key, value, ttl).await
    }

    /// Dry-run reports `false` (nothing written).
    pub async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        if self.dry {
            tracing::debug!(key, "dry-run: suppressed put_if_absent");
            return Ok(false);
        }
        self.store.put_if_absent(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        if self.dry {
            tracing::debug!(key, "dry-run: suppressed delete");
            return Ok(());
        }
        self.store.delete(key).await
    }
}

// =============================================================================
// Tests
// =============================================================================
