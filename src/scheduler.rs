// =============================================================================
// In-Process Scheduler — optional tick driver
// =============================================================================
//
// Production deployments fire the two entry points from an external cron.
// For single-box setups the gateway can drive itself: the ingestor runs
// shortly after each 5-minute bucket boundary and the evaluator one minute
// later, preserving the contracted ingest-before-evaluate ordering within
// every bucket.

use std::sync::Arc;

use tracing::{info, warn};

use crate::app_state::AppState;
use crate::bucket::{bucket_of, bucket_start_ms};
use crate::pipeline::{self, EvalRequest};
use crate::snapshot;

/// Delay after the bucket boundary before the ingestor fires.
const INGEST_OFFSET_MS: i64 = 5_000;
/// Delay after the bucket boundary before the evaluator fires.
const EVAL_OFFSET_MS: i64 = 65_000;

/// Run the tick loop forever. Spawned from main when the scheduler is
/// enabled.
pub async fn run(state: Arc<AppState>) {
    info!("in-process scheduler running (ingest +5s, evaluate +65s per bucket)");

    loop {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let next_bucket_start = bucket_start_ms(bucket_of(now_ms) + 1);

        sleep_until(next_bucket_start + INGEST_OFFSET_MS).await;
        let symbols = state.config.read().symbols.clone();
        let ingest_now = chrono::Utc::now().timestamp_millis();
        let batch =
            snapshot::run_snapshot(state.store.clone(), state.source.clone(), &symbols, ingest_now)
                .await;
        let failed = batch.results.iter().filter(|r| !r.ok).count();
        if failed > 0 {
            warn!(failed, total = batch.results.len(), "ingest tick had failures");
        }

        sleep_until(next_bucket_start + EVAL_OFFSET_MS).await;
        let cfg = state.config_snapshot();
        let req = EvalRequest {
            modes: cfg.effective_modes(),
            risk_profile: cfg.default_risk_profile,
            driver_tf: None,
            force: false,
            dry: false,
            debug: false,
            symbols: cfg.symbols.clone(),
        };
        let eval_now = chrono::Utc::now().timestamp_millis();
        let report = pipeline::evaluate_tick(&state, &req, eval_now).await;
        info!(
            sent = report.sent,
            triggered = report.triggered_count,
            evaluated = report.evaluated,
            "evaluate tick complete"
        );
    }
}

/// Sleep until the given epoch-ms instant (no-op if already past).
async fn sleep_until(target_ms: i64) {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let delta = target_ms - now_ms;
    if delta > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(delta as u64)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_keep_ingest_before_evaluate_within_a_bucket() {
        assert!(INGEST_OFFSET_MS < EVAL_OFFSET_MS);
        assert!(EVAL_OFFSET_MS < crate::bucket::BUCKET_MS);
    }
}
