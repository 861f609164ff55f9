// =============================================================================
// Central Application State
// =============================================================================
//
// Ties the three ports (store, market source, notifier) to the runtime
// configuration. Handlers receive `Arc<AppState>`; each port is object-safe
// so tests swap in fakes without touching the pipeline.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::GatewayConfig;
use crate::derive::DeriveCounters;
use crate::notify::Notifier;
use crate::source::MarketSource;
use crate::store::KvStore;

pub struct AppState {
    /// Runtime configuration (read-mostly).
    pub config: RwLock<GatewayConfig>,

    /// The shared KV store — the only mutable state between components.
    pub store: Arc<dyn KvStore>,

    /// Upstream exchange client. Only the ingestor calls it.
    pub source: Arc<dyn MarketSource>,

    /// Outbound alert channel. Only the evaluator calls it.
    pub notifier: Arc<dyn Notifier>,

    /// Derivation-engine proof counters (snapshot hits/misses, market calls).
    pub counters: DeriveCounters,

    /// Engine start time, for the health endpoint.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn KvStore>,
        source: Arc<dyn MarketSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            store,
            source,
            notifier,
            counters: DeriveCounters::default(),
            start_time: std::time::Instant::now(),
        }
    }

    /// Clone of the current configuration, for use across await points.
    pub fn config_snapshot(&self) -> GatewayConfig {
        self.config.read().clone()
    }
}
