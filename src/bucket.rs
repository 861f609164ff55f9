// =============================================================================
// Time discretization — 5-minute bucket grid
// =============================================================================
//
// Every timestamp in the system is UTC epoch milliseconds. The engine is
// bucket-aligned: two observations inside the same 5-minute cell are the
// same logical observation.

/// Width of one bucket in milliseconds.
pub const BUCKET_MS: i64 = 300_000;

/// Number of buckets retained in the rolling series (24 hours).
pub const SERIES_CAPACITY: usize = 288;

/// Integer bucket index of a UTC-millisecond timestamp.
pub fn bucket_of(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(BUCKET_MS)
}

/// Epoch-ms of the start of bucket `b`.
pub fn bucket_start_ms(b: i64) -> i64 {
    b * BUCKET_MS
}

// =============================================================================
// Tests
// =============================================================================
