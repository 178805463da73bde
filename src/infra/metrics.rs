//! Lock-free workflow metrics and summary reporting
//!
//! Counters are plain atomics updated from the workflow on each run; the
//! summary is taken on demand (the CLI logs one before exit).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use crate::domain::types::ErrorReason;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Run duration bucket boundaries (milliseconds)
/// Buckets: ≤250, ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, >128000
const DURATION_BOUNDS_MS: [u64; 10] =
    [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000];
const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(duration_ms: u64) -> usize {
    DURATION_BOUNDS_MS.partition_point(|&bound| bound < duration_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

pub struct Metrics {
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_cancelled: AtomicU64,
    camera_failures: AtomicU64,
    location_failures: AtomicU64,
    liveness_failures: AtomicU64,
    other_failures: AtomicU64,
    location_mismatches: AtomicU64,
    forced_overrides: AtomicU64,
    duration_buckets: [AtomicU64; NUM_BUCKETS],
    duration_sum_ms: AtomicU64,
    duration_max_ms: AtomicU64,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_cancelled: AtomicU64::new(0),
            camera_failures: AtomicU64::new(0),
            location_failures: AtomicU64::new(0),
            liveness_failures: AtomicU64::new(0),
            other_failures: AtomicU64::new(0),
            location_mismatches: AtomicU64::new(0),
            forced_overrides: AtomicU64::new(0),
            duration_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            duration_sum_ms: AtomicU64::new(0),
            duration_max_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run that reached Success
    pub fn record_success(&self, duration_ms: u64, forced_override: bool) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
        if forced_override {
            self.forced_overrides.fetch_add(1, Ordering::Relaxed);
        }
        self.record_duration(duration_ms);
    }

    /// Record a run that reached Error, bucketed by failure class
    pub fn record_failure(&self, reason: ErrorReason, duration_ms: u64) {
        let counter = match reason {
            ErrorReason::PermissionDenied
            | ErrorReason::DeviceBusy
            | ErrorReason::DeviceNotFound
            | ErrorReason::CameraTimeout => &self.camera_failures,
            ErrorReason::LocationUnavailable | ErrorReason::LocationTimeout => {
                &self.location_failures
            }
            ErrorReason::LivenessFailed | ErrorReason::LivenessInconclusive => {
                &self.liveness_failures
            }
            ErrorReason::Unknown => &self.other_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration_ms);
    }

    #[inline]
    pub fn record_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record entry into the location mismatch warning
    #[inline]
    pub fn record_location_mismatch(&self) {
        self.location_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    fn record_duration(&self, duration_ms: u64) {
        self.duration_buckets[bucket_index(duration_ms)].fetch_add(1, Ordering::Relaxed);
        self.duration_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        update_atomic_max(&self.duration_max_ms, duration_ms);
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_succeeded(&self) -> u64 {
        self.runs_succeeded.load(Ordering::Relaxed)
    }

    pub fn runs_cancelled(&self) -> u64 {
        self.runs_cancelled.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.camera_failures.load(Ordering::Relaxed)
            + self.location_failures.load(Ordering::Relaxed)
            + self.liveness_failures.load(Ordering::Relaxed)
            + self.other_failures.load(Ordering::Relaxed)
    }

    pub fn location_mismatches(&self) -> u64 {
        self.location_mismatches.load(Ordering::Relaxed)
    }

    pub fn forced_overrides(&self) -> u64 {
        self.forced_overrides.load(Ordering::Relaxed)
    }

    /// Snapshot of all counters. Nothing is reset.
    pub fn summary(&self) -> MetricsSummary {
        let buckets = load_buckets(&self.duration_buckets);
        let finished: u64 = buckets.iter().sum();
        let sum_ms = self.duration_sum_ms.load(Ordering::Relaxed);

        MetricsSummary {
            uptime_secs: self.started_at.elapsed().as_secs(),
            runs_started: self.runs_started(),
            runs_succeeded: self.runs_succeeded(),
            runs_cancelled: self.runs_cancelled(),
            camera_failures: self.camera_failures.load(Ordering::Relaxed),
            location_failures: self.location_failures.load(Ordering::Relaxed),
            liveness_failures: self.liveness_failures.load(Ordering::Relaxed),
            other_failures: self.other_failures.load(Ordering::Relaxed),
            location_mismatches: self.location_mismatches(),
            forced_overrides: self.forced_overrides(),
            duration_buckets: buckets,
            avg_duration_ms: if finished > 0 { sum_ms / finished } else { 0 },
            max_duration_ms: self.duration_max_ms.load(Ordering::Relaxed),
            p95_duration_ms: percentile_from_buckets(&buckets, 0.95),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_cancelled: u64,
    /// Permission, busy, not found and acquisition/frame timeouts
    pub camera_failures: u64,
    pub location_failures: u64,
    pub liveness_failures: u64,
    pub other_failures: u64,
    pub location_mismatches: u64,
    pub forced_overrides: u64,
    /// Duration of finished runs (success or error)
    /// Bounds: ≤250, ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, >128000 ms
    pub duration_buckets: [u64; NUM_BUCKETS],
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
    pub p95_duration_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            runs_started = %self.runs_started,
            runs_succeeded = %self.runs_succeeded,
            runs_cancelled = %self.runs_cancelled,
            camera_failures = %self.camera_failures,
            location_failures = %self.location_failures,
            liveness_failures = %self.liveness_failures,
            location_mismatches = %self.location_mismatches,
            forced_overrides = %self.forced_overrides,
            avg_duration_ms = %self.avg_duration_ms,
            p95_duration_ms = %self.p95_duration_ms,
            "metrics"
        );
    }
}
