//! An adaptive concurrency window that sheds excess load.
//!
//! Each upstream cluster gets a [`GradientLimit`]: a concurrency ceiling that
//! widens while the upstream keeps latency near its observed baseline and
//! narrows multiplicatively when latency degrades. Requests that arrive with
//! the window full are rejected immediately via [`GradientLimit::try_acquire`]
//! returning `None`. There is no queue, so overload turns into fast, cheap
//! failures instead of buffered latency.
//!
//! The controller compares a smoothed round-trip sample against the minimum
//! round trip observed over a short rotating window. The ratio of the two,
//! bounded by the policy's tolerance, is the gradient applied on decrease;
//! growth adds `sqrt(limit)` headroom and only happens while the window is
//! actually contended.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

mod service;

pub use self::service::{Layer, ResponseFuture, Shed};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;
use weft_policy::LimitPolicy;

/// The request was rejected because the concurrency window is full.
#[derive(Clone, Debug, Default, Error)]
#[error("concurrency window is full")]
pub struct ShedError(());

/// A shared adaptive concurrency window.
///
/// Clones share state, so one limit can span every service built for a
/// cluster.
#[derive(Clone, Debug)]
pub struct GradientLimit {
    shared: Arc<Shared>,
}

/// Holds one slot in the window.
///
/// Dropping the permit frees the slot, so cancelled callers release promptly.
/// [`complete`] additionally feeds the observed round trip back into the
/// controller; a permit dropped without completing records no sample.
///
/// [`complete`]: Permit::complete
#[derive(Debug)]
#[must_use = "dropping a permit immediately frees its slot"]
pub struct Permit {
    shared: Arc<Shared>,
    started: Instant,
}

#[derive(Debug)]
struct Shared {
    policy: LimitPolicy,
    /// Integer ceiling, cached out of the lock for admission checks.
    ceiling: AtomicUsize,
    in_flight: AtomicUsize,
    /// Peak in-flight since the last adjustment.
    peak: AtomicUsize,
    window: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    limit: f64,
    baseline: Baseline,
    smoothed: Option<f64>,
    next_adjust: Instant,
}

/// Minimum round trip over the last `BUCKETS` rotation periods.
#[derive(Debug)]
struct Baseline {
    buckets: [f64; BUCKETS],
    current: usize,
    rotated_at: Instant,
}

const BUCKETS: usize = 6;
const BUCKET_ROTATION: Duration = Duration::from_secs(10);
const ADJUST_INTERVAL: Duration = Duration::from_millis(500);
const EWMA_ALPHA: f64 = 0.2;
/// Grow only when peak concurrency reached this share of the window.
const GROWTH_UTILIZATION: f64 = 0.8;

// === impl GradientLimit ===

impl GradientLimit {
    pub fn new(policy: LimitPolicy) -> Self {
        let now = Instant::now();
        let limit = f64::from(policy.initial);
        Self {
            shared: Arc::new(Shared {
                policy,
                ceiling: AtomicUsize::new(policy.initial as usize),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                window: Mutex::new(Window {
                    limit,
                    baseline: Baseline::new(now),
                    smoothed: None,
                    next_adjust: now + ADJUST_INTERVAL,
                }),
            }),
        }
    }

    /// Takes a slot if the window has room, without waiting for one.
    pub fn try_acquire(&self) -> Option<Permit> {
        let ceiling = self.shared.ceiling.load(Ordering::Acquire);
        let mut in_flight = self.shared.in_flight.load(Ordering::Acquire);
        loop {
            if in_flight >= ceiling {
                trace!(in_flight, ceiling, "Shedding");
                return None;
            }
            match self.shared.in_flight.compare_exchange_weak(
                in_flight,
                in_flight + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => in_flight = actual,
            }
        }

        self.shared.peak.fetch_max(in_flight + 1, Ordering::AcqRel);
        Some(Permit {
            shared: self.shared.clone(),
            started: Instant::now(),
        })
    }

    /// The current integer ceiling.
    pub fn limit(&self) -> usize {
        self.shared.ceiling.load(Ordering::Acquire)
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> LimitPolicy {
        self.shared.policy
    }
}

// === impl Permit ===

impl Permit {
    /// Feeds the request's round trip into the controller and frees the slot.
    pub fn complete(self) {
        let rtt = self.started.elapsed();
        self.shared.record(rtt);
        // Drop frees the slot.
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

// === impl Shared ===

impl Shared {
    fn record(&self, rtt: Duration) {
        let now = Instant::now();
        let rtt = rtt.as_secs_f64();

        let mut window = self.window.lock();
        window.baseline.record(rtt, now);
        window.smoothed = Some(match window.smoothed {
            Some(s) => s + EWMA_ALPHA * (rtt - s),
            None => rtt,
        });

        if now >= window.next_adjust {
            self.adjust(&mut window);
            window.next_adjust = now + ADJUST_INTERVAL;
        }
    }

    fn adjust(&self, window: &mut Window) {
        let (baseline, sample) = match (window.baseline.min(), window.smoothed) {
            (Some(b), Some(s)) => (b, s),
            _ => return,
        };

        let tolerated = self.policy.tolerance * baseline;
        let peak = self.peak.swap(self.in_flight.load(Ordering::Acquire), Ordering::AcqRel);

        if sample > tolerated {
            let gradient = (tolerated / sample).clamp(0.5, 1.0);
            window.limit *= gradient;
        } else if peak as f64 >= GROWTH_UTILIZATION * window.limit {
            window.limit += window.limit.sqrt();
        }
        window.limit = window
            .limit
            .clamp(f64::from(self.policy.min), f64::from(self.policy.max));

        let ceiling = (window.limit as usize).max(1);
        trace!(limit = window.limit, ceiling, sample, baseline, "Adjusted");
        self.ceiling.store(ceiling, Ordering::Release);
    }
}

// === impl Baseline ===

impl Baseline {
    fn new(now: Instant) -> Self {
        Self {
            buckets: [f64::INFINITY; BUCKETS],
            current: 0,
            rotated_at: now,
        }
    }

    fn record(&mut self, rtt: f64, now: Instant) {
        self.advance(now);
        if rtt < self.buckets[self.current] {
            self.buckets[self.current] = rtt;
        }
    }

    fn advance(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.rotated_at);
        if elapsed >= BUCKET_ROTATION * BUCKETS as u32 {
            self.buckets = [f64::INFINITY; BUCKETS];
            self.rotated_at = now;
            return;
        }
        while now.saturating_duration_since(self.rotated_at) >= BUCKET_ROTATION {
            self.rotated_at += BUCKET_ROTATION;
            self.current = (self.current + 1) % BUCKETS;
            self.buckets[self.current] = f64::INFINITY;
        }
    }

    fn min(&self) -> Option<f64> {
        let min = self.buckets.iter().copied().fold(f64::INFINITY, f64::min);
        min.is_finite().then_some(min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    fn policy(initial: u32, min: u32, max: u32) -> LimitPolicy {
        LimitPolicy {
            initial,
            min,
            max,
            tolerance: 2.0,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sheds_at_the_ceiling_and_frees_on_drop() {
        let limit = GradientLimit::new(policy(2, 1, 4));

        let p0 = limit.try_acquire().expect("slot 0");
        let _p1 = limit.try_acquire().expect("slot 1");
        assert!(limit.try_acquire().is_none(), "window is full");
        assert_eq!(limit.in_flight(), 2);

        // Dropping without completing frees the slot, as on cancellation.
        drop(p0);
        assert!(limit.try_acquire().is_some());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn grows_while_fast_and_contended() {
        let limit = GradientLimit::new(policy(2, 1, 100));

        for _ in 0..60 {
            let p0 = limit.try_acquire().expect("slot 0");
            let p1 = limit.try_acquire().expect("slot 1");
            time::advance(Duration::from_millis(10)).await;
            p0.complete();
            p1.complete();
        }

        assert!(
            limit.limit() >= 3,
            "fast, saturated traffic must widen the window (limit={})",
            limit.limit()
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn shrinks_to_min_when_latency_degrades() {
        let limit = GradientLimit::new(policy(8, 2, 8));

        // Establish a 10ms baseline.
        for _ in 0..60 {
            let p = limit.try_acquire().expect("slot");
            time::advance(Duration::from_millis(10)).await;
            p.complete();
        }
        assert_eq!(limit.limit(), 8, "near-baseline latency must not shrink");

        // Latency degrades an order of magnitude past tolerance.
        for _ in 0..20 {
            let p = limit.try_acquire().expect("slot");
            time::advance(Duration::from_millis(100)).await;
            p.complete();
        }
        assert_eq!(limit.limit(), 2, "degraded latency must shrink to min");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn growth_respects_max() {
        let limit = GradientLimit::new(policy(2, 1, 3));

        for _ in 0..120 {
            let p0 = limit.try_acquire().expect("slot 0");
            let p1 = limit.try_acquire().expect("slot 1");
            time::advance(Duration::from_millis(10)).await;
            p0.complete();
            p1.complete();
        }

        assert_eq!(limit.limit(), 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn baseline_forgets_old_minima() {
        let now = Instant::now();
        let mut baseline = Baseline::new(now);

        baseline.record(0.005, now);
        assert_eq!(baseline.min(), Some(0.005));

        // After the full window rotates away, the old minimum is gone.
        let later = now + BUCKET_ROTATION * (BUCKETS as u32 + 1);
        baseline.advance(later);
        assert_eq!(baseline.min(), None);

        baseline.record(0.030, later);
        assert_eq!(baseline.min(), Some(0.030));
    }

    quickcheck::quickcheck! {
        fn gradient_is_bounded(baseline_ms: u32, sample_ms: u32, tolerance: u8) -> quickcheck::TestResult {
            if baseline_ms == 0 || sample_ms == 0 || tolerance == 0 {
                return quickcheck::TestResult::discard();
            }
            let tolerated = f64::from(tolerance) * f64::from(baseline_ms);
            let gradient = (tolerated / f64::from(sample_ms)).clamp(0.5, 1.0);
            quickcheck::TestResult::from_bool((0.5..=1.0).contains(&gradient))
        }
    }
}
