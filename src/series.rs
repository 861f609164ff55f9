// =============================================================================
// Rolling Series — 24 h of per-bucket points per instrument
// =============================================================================
//
// The derivation engine appends at most one point per bucket, gated by
// `lastBucket:{inst}`. The persisted form is a JSON array of points with
// short field names to keep the blob small. Capacity is 288 points; the
// oldest points are evicted first.
//
// Appends flow through the dry-run write handle: a dry evaluation still
// gets the in-memory point for delta computation, but nothing is persisted.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bucket::SERIES_CAPACITY;
use crate::snapshot::SnapshotPoint;
use crate::store::{keys, KvStore, StateWriter, SERIES_TTL};

/// One 5-minute cell of the rolling series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Bucket index.
    pub b: i64,

    /// Observation timestamp (UTC epoch ms).
    pub ts: i64,

    /// Price.
    pub p: f64,

    /// Funding rate; absent when the snapshot had none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fr: Option<f64>,

    /// Open interest in contracts; absent when the snapshot had none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oi: Option<f64>,
}

impl SeriesPoint {
    pub fn from_snapshot(bucket: i64, snap: &SnapshotPoint) -> Self {
        Self {
            b: bucket,
            ts: snap.ts,
            p: snap.price,
            fr: snap.funding_rate,
            oi: snap.open_interest_contracts,
        }
    }
}

/// Load the persisted series for an instrument. An unreadable blob is
/// treated as an empty series (the store self-heals on the next append).
pub async fn load(store: &dyn KvStore, inst: &str) -> anyhow::Result<Vec<SeriesPoint>> {
    let Some(raw) = store.get(&keys::series(inst)).await? else {
        return Ok(Vec::new());
    };

    match serde_json::from_str::<Vec<SeriesPoint>>(&raw) {
        Ok(points) => Ok(points),
        Err(e) => {
            warn!(inst, error = %e, "series blob unreadable — starting fresh");
            Ok(Vec::new())
        }
    }
}

/// Advance the series for the current bucket.
///
/// Appends `snap` as a new point when `lastBucket` differs from `bucket`,
/// trims to capacity and refreshes both TTLs. Returns the up-to-date point
/// list (including the new point even when the write handle is dry) and
/// whether an append happened.
pub async fn advance(
    store: &dyn KvStore,
    writer: &StateWriter,
    inst: &str,
    bucket: i64,
    snap: &SnapshotPoint,
) -> anyhow::Result<(Vec<SeriesPoint>, bool)> {
    let mut points = load(store, inst).await?;

    let last_bucket = match store.get(&keys::last_bucket(inst)).await? {
        Some(raw) => raw.trim().parse::<i64>().ok(),
        None => None,
    };

    if last_bucket == Some(bucket) {
        return Ok((points, false));
    }

    points.push(SeriesPoint::from_snapshot(bucket, snap));

    // Trim from the front using positive indices.
    if points.len() > SERIES_CAPACITY {
        let excess = points.len() - SERIES_CAPACITY;
        points.drain(0..excess);
    }

    let payload = serde_json::to_string(&points)?;
    writer
        .put(&keys::series(inst), &payload, Some(SERIES_TTL))
        .await?;
    writer
        .put(
            &keys::last_bucket(inst),
            &bucket.to_string(),
            Some(SERIES_TTL),
        )
        .await?;

    Ok((points, true))
}

/// Lowest price over the trailing `n` points.
pub fn recent_low(points: &[SeriesPoint], n: usize) -> Option<f64> {
    let start = points.len().saturating_sub(n);
    points[start..]
        .iter()
        .map(|pt| pt.p)
        .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.min(p))))
}

/// Highest price over the trailing `n` points.
pub fn recent_high(points: &[SeriesPoint], n: usize) -> Option<f64> {
    let start = points.len().saturating_sub(n);
    points[start..]
        .iter()
        .map(|pt| pt.p)
        .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.max(p))))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn snap(ts: i64, price: f64) -> SnapshotPoint {
        SnapshotPoint {
            ts,
            price,
            funding_rate: Some(0.0001),
            open_interest_contracts: Some(1000.0),
        }
    }

    fn wet(store: &Arc<MemoryStore>) -> StateWriter {
        StateWriter::new(store.clone() as Arc<dyn KvStore>, false)
    }

    #[tokio::test]
    async fn appends_once_per_bucket() {
        let store = Arc::new(MemoryStore::new());
        let writer = wet(&store);

        let (points, appended) = advance(store.as_ref(), &writer, "ETH-USDT-SWAP", 100, &snap(1, 10.0))
            .await
            .unwrap();
        assert!(appended);
        assert_eq!(points.len(), 1);

        // Same bucket again: no-op, series unchanged.
        let (points, appended) = advance(store.as_ref(), &writer, "ETH-USDT-SWAP", 100, &snap(2, 11.0))
            .await
            .unwrap();
        assert!(!appended);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].p, 10.0);

        // Next bucket appends.
        let (points, appended) = advance(store.as_ref(), &writer, "ETH-USDT-SWAP", 101, &snap(3, 12.0))
            .await
            .unwrap();
        assert!(appended);
        assert_eq!(points.len(), 2);
        assert_eq!(
            store.get("lastBucket:ETH-USDT-SWAP").await.unwrap().as_deref(),
            Some("101")
        );
    }

    #[tokio::test]
    async fn trims_to_capacity_evicting_oldest() {
        let store = Arc::new(MemoryStore::new());
        let writer = wet(&store);

        for i in 0..(SERIES_CAPACITY as i64 + 5) {
            advance(store.as_ref(), &writer, "X-USDT-SWAP", i, &snap(i, i as f64))
                .await
                .unwrap();
        }

        let points = load(store.as_ref(), "X-USDT-SWAP").await.unwrap();
        assert_eq!(points.len(), SERIES_CAPACITY);
        assert_eq!(points[0].b, 5);
        assert_eq!(points.last().unwrap().b, SERIES_CAPACITY as i64 + 4);

        // Strictly increasing buckets, no duplicates.
        for pair in points.windows(2) {
            assert!(pair[0].b < pair[1].b);
        }
    }

    #[tokio::test]
    async fn dry_append_returns_point_without_persisting() {
        let store = Arc::new(MemoryStore::new());
        let dry = StateWriter::new(store.clone() as Arc<dyn KvStore>, true);

        let (points, appended) = advance(store.as_ref(), &dry, "ETH-USDT-SWAP", 100, &snap(1, 10.0))
            .await
            .unwrap();
        assert!(appended);
        assert_eq!(points.len(), 1);

        assert_eq!(store.get("series5m:ETH-USDT-SWAP").await.unwrap(), None);
        assert_eq!(store.get("lastBucket:ETH-USDT-SWAP").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreadable_blob_degrades_to_empty() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("series5m:ETH-USDT-SWAP", "not json", None)
            .await
            .unwrap();
        let points = load(store.as_ref(), "ETH-USDT-SWAP").await.unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn recent_extremes() {
        let points: Vec<SeriesPoint> = [10.0, 9.0, 11.0, 8.5, 10.5]
            .iter()
            .enumerate()
            .map(|(i, &p)| SeriesPoint {
                b: i as i64,
                ts: i as i64,
                p,
                fr: None,
                oi: None,
            })
            .collect();

        assert_eq!(recent_low(&points, 3), Some(8.5));
        assert_eq!(recent_high(&points, 3), Some(11.0));
        assert_eq!(recent_low(&points, 100), Some(8.5));
        assert_eq!(recent_low(&[], 3), None);
    }
}
