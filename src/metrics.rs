//! Metrics Counters (`spec.md` §2 component B / §4.B').
//!
//! Atomic counters plus a 60-bucket rolling window, CAS-based per bucket as
//! `spec.md` §9 mandates. Thresholds (75% warning, 90% critical) and the
//! derived-health formula are ported from
//! `original_source/.../infrastructure/artnet/server_stats.go` and
//! `.../metrics/collector.go`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const BUCKETS: usize = 60;
const WARNING_UTILIZATION_PERCENT: f64 = 75.0;
const CRITICAL_UTILIZATION_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Healthy = 0,
    Warning = 1,
    Critical = 2,
}

struct Bucket {
    /// Unix second this bucket currently represents. `-1` means "unused".
    second: AtomicI64,
    count: AtomicU64,
}

impl Bucket {
    const fn new() -> Self {
        Self {
            second: AtomicI64::new(-1),
            count: AtomicU64::new(0),
        }
    }
}

/// Process-wide counters shared by the receive/send workers, the stat
/// monitor, and the `/metrics` HTTP surface.
pub struct Metrics {
    received_total: AtomicU64,
    dropped_receive: AtomicU64,
    dropped_send: AtomicU64,
    buckets: [Bucket; BUCKETS],
    buffer_size: AtomicU64,
}

impl Metrics {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            received_total: AtomicU64::new(0),
            dropped_receive: AtomicU64::new(0),
            dropped_send: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| Bucket::new()),
            buffer_size: AtomicU64::new(buffer_size as u64),
        }
    }

    /// Record one received packet at the current second.
    pub fn record_received(&self) {
        self.record_received_at(now_unix_secs());
    }

    /// Record one received packet at an arbitrary second. Split out from
    /// `record_received` so tests can exercise rollover deterministically
    /// (invariant 5 / scenario S6 in `spec.md` §8).
    pub fn record_received_at(&self, second: i64) {
        self.received_total.fetch_add(1, Ordering::Relaxed);

        let bucket = &self.buckets[(second.rem_euclid(BUCKETS as i64)) as usize];
        loop {
            let current = bucket.second.load(Ordering::Acquire);
            if current == second {
                bucket.count.fetch_add(1, Ordering::AcqRel);
                return;
            }
            if bucket
                .second
                .compare_exchange(current, second, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                bucket.count.store(1, Ordering::Release);
                return;
            }
            // Lost the CAS race to another writer targeting the same
            // second; retry and let the loop re-observe state.
        }
    }

    pub fn received_total(&self) -> u64 {
        self.received_total.load(Ordering::Relaxed)
    }

    /// Sum of buckets whose recorded second falls within `[now-60, now]`.
    pub fn received_last_minute(&self) -> u64 {
        self.received_last_minute_at(now_unix_secs())
    }

    pub fn received_last_minute_at(&self, now: i64) -> u64 {
        let window_start = now - (BUCKETS as i64 - 1);
        self.buckets
            .iter()
            .filter_map(|bucket| {
                let second = bucket.second.load(Ordering::Acquire);
                if second >= window_start && second <= now {
                    Some(bucket.count.load(Ordering::Acquire))
                } else {
                    None
                }
            })
            .sum()
    }

    pub fn record_dropped_receive(&self) -> u64 {
        self.dropped_receive.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_dropped_send(&self) -> u64 {
        self.dropped_send.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn dropped_receive(&self) -> u64 {
        self.dropped_receive.load(Ordering::Relaxed)
    }

    pub fn dropped_send(&self) -> u64 {
        self.dropped_send.load(Ordering::Relaxed)
    }

    pub fn buffer_size(&self) -> u64 {
        self.buffer_size.load(Ordering::Relaxed)
    }
}

pub fn utilization_percent(queue_len: usize, capacity: u64) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    (queue_len as f64 / capacity as f64) * 100.0
}

/// `status = critical if utilization >= 90% OR dropped > 0; warning if
/// utilization >= 75%; healthy otherwise` — `spec.md` §4.E, verbatim.
pub fn health_status(utilization_percent: f64, dropped: u64) -> HealthStatus {
    if utilization_percent >= CRITICAL_UTILIZATION_PERCENT || dropped > 0 {
        HealthStatus::Critical
    } else if utilization_percent >= WARNING_UTILIZATION_PERCENT {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_and_last_minute_split_by_window() {
        let metrics = Metrics::new(1000);
        let now = 1_700_000_000i64;

        for _ in 0..5 {
            metrics.record_received_at(now);
        }
        for _ in 0..3 {
            metrics.record_received_at(now - 61);
        }

        assert_eq!(metrics.received_total(), 8);
        assert_eq!(metrics.received_last_minute_at(now), 5);
    }

    #[test]
    fn bucket_reuse_across_minutes_resets_count() {
        let metrics = Metrics::new(1000);
        let base = 1_700_000_000i64;

        metrics.record_received_at(base);
        metrics.record_received_at(base);
        assert_eq!(metrics.received_last_minute_at(base), 2);

        // One full cycle later the same bucket index is reused; its old
        // count must not leak into the new window.
        let later = base + BUCKETS as i64;
        metrics.record_received_at(later);
        assert_eq!(metrics.received_last_minute_at(later), 1);
    }

    #[test]
    fn dropped_receive_strictly_increases() {
        let metrics = Metrics::new(4);
        assert_eq!(metrics.record_dropped_receive(), 1);
        assert_eq!(metrics.record_dropped_receive(), 2);
        assert_eq!(metrics.dropped_receive(), 2);
    }

    #[test]
    fn health_thresholds_match_spec() {
        assert_eq!(health_status(10.0, 0), HealthStatus::Healthy);
        assert_eq!(health_status(80.0, 0), HealthStatus::Warning);
        assert_eq!(health_status(95.0, 0), HealthStatus::Critical);
        assert_eq!(health_status(10.0, 1), HealthStatus::Critical);
    }

    #[test]
    fn utilization_percent_handles_zero_capacity() {
        assert_eq!(utilization_percent(0, 0), 0.0);
        assert_eq!(utilization_percent(50, 100), 50.0);
    }

    #[test]
    fn worse_of_two_statuses_wins_the_aggregate() {
        let receive = health_status(10.0, 0); // Healthy
        let send = health_status(95.0, 0); // Critical
        assert_eq!(receive.max(send), HealthStatus::Critical);
    }
}
