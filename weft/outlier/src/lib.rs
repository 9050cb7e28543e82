//! Passive outlier detection.
//!
//! Each proxy tracks, per endpoint, a run of consecutive failures observed on
//! its own traffic. When the run reaches the policy threshold the endpoint is
//! ejected: the balancer stops offering it new requests until an ejection
//! window passes. Re-admission is optimistic: eligibility returns on its own
//! when the window elapses, and the next outcome decides what happens. A
//! success starts paying the ejection count down; another run of failures
//! re-ejects with a doubled window.
//!
//! State is strictly local to the proxy that observed the failures; it is
//! never shared or reported upstream.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use weft_policy::OutlierPolicy;

/// Per-endpoint failure accrual for one cluster.
///
/// Handles are shared with the balancer's endpoint set so the hot path checks
/// ejection with one atomic load; the map itself is only touched when
/// membership changes.
#[derive(Debug)]
pub struct OutlierMap {
    policy: OutlierPolicy,
    epoch: Instant,
    states: Mutex<HashMap<SocketAddr, Arc<OutlierState>>>,
}

/// One endpoint's accrual state.
#[derive(Debug)]
pub struct OutlierState {
    policy: OutlierPolicy,
    epoch: Instant,
    /// Ejection deadline in milliseconds since the map's epoch; zero when the
    /// endpoint is not ejected.
    deadline_ms: AtomicU64,
    inner: Mutex<Accrual>,
}

#[derive(Debug, Default)]
struct Accrual {
    consecutive: u32,
    ejections: u32,
    ejected_until: Option<Instant>,
}

// === impl OutlierMap ===

impl OutlierMap {
    pub fn new(policy: OutlierPolicy) -> Self {
        Self {
            policy,
            epoch: Instant::now(),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> OutlierPolicy {
        self.policy
    }

    /// Gets or creates the state for an endpoint.
    pub fn handle(&self, addr: SocketAddr) -> Arc<OutlierState> {
        self.states
            .lock()
            .entry(addr)
            .or_insert_with(|| {
                Arc::new(OutlierState {
                    policy: self.policy,
                    epoch: self.epoch,
                    deadline_ms: AtomicU64::new(0),
                    inner: Mutex::new(Accrual::default()),
                })
            })
            .clone()
    }

    /// Drops state for endpoints that left the cluster.
    pub fn retain(&self, mut keep: impl FnMut(&SocketAddr) -> bool) {
        self.states.lock().retain(|addr, _| keep(addr));
    }

    /// The number of endpoints currently ejected.
    pub fn ejected(&self) -> usize {
        let now = Instant::now();
        self.states
            .lock()
            .values()
            .filter(|s| s.is_ejected_at(now))
            .count()
    }
}

// === impl OutlierState ===

impl OutlierState {
    /// Whether the endpoint is currently withheld from selection.
    pub fn is_ejected(&self) -> bool {
        self.is_ejected_at(Instant::now())
    }

    fn is_ejected_at(&self, now: Instant) -> bool {
        let deadline_ms = self.deadline_ms.load(Ordering::Acquire);
        if deadline_ms == 0 {
            return false;
        }
        self.millis_since_epoch(now) < deadline_ms
    }

    /// Records a successful response.
    pub fn record_success(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.consecutive = 0;

        // Only post-re-admission successes pay the ejection count down; an
        // in-flight request finishing during the window proves nothing about
        // recovery.
        if let Some(deadline) = inner.ejected_until {
            if now < deadline {
                return;
            }
            inner.ejected_until = None;
            self.deadline_ms.store(0, Ordering::Release);
        }
        inner.ejections = inner.ejections.saturating_sub(1);
    }

    /// Records a failed response. Returns the ejection window when this
    /// failure completes a run and ejects the endpoint.
    pub fn record_failure(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        // Failures observed during an ejection window are in-flight stragglers
        // and do not charge the next run.
        if let Some(deadline) = inner.ejected_until {
            if now < deadline {
                return None;
            }
        }

        inner.consecutive += 1;
        if inner.consecutive < self.policy.consecutive_failures {
            return None;
        }

        inner.consecutive = 0;
        inner.ejections += 1;
        let window = self.window(inner.ejections);
        let deadline = now + window;
        inner.ejected_until = Some(deadline);
        self.deadline_ms
            .store(self.millis_since_epoch(deadline).max(1), Ordering::Release);
        debug!(ejections = inner.ejections, ?window, "Ejecting");
        Some(window)
    }

    /// `base_ejection` doubled per prior ejection, capped at `max_ejection`.
    fn window(&self, ejections: u32) -> Duration {
        let exp = ejections.saturating_sub(1).min(16);
        self.policy
            .base_ejection
            .saturating_mul(1 << exp)
            .min(self.policy.max_ejection)
    }

    fn millis_since_epoch(&self, t: Instant) -> u64 {
        t.saturating_duration_since(self.epoch).as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    fn policy() -> OutlierPolicy {
        OutlierPolicy {
            consecutive_failures: 3,
            base_ejection: Duration::from_secs(30),
            max_ejection: Duration::from_secs(120),
        }
    }

    fn addr() -> SocketAddr {
        "10.0.0.1:8080".parse().unwrap()
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn ejects_after_a_run_and_readmits() {
        let map = OutlierMap::new(policy());
        let state = map.handle(addr());

        assert_eq!(state.record_failure(), None);
        assert_eq!(state.record_failure(), None);
        assert!(!state.is_ejected());

        assert_eq!(state.record_failure(), Some(Duration::from_secs(30)));
        assert!(state.is_ejected());
        assert_eq!(map.ejected(), 1);

        // Eligibility returns on its own once the window passes.
        time::advance(Duration::from_secs(30)).await;
        assert!(!state.is_ejected());
        assert_eq!(map.ejected(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn windows_double_and_cap() {
        let map = OutlierMap::new(policy());
        let state = map.handle(addr());

        let eject = |state: &OutlierState| {
            let mut window = None;
            while window.is_none() {
                window = state.record_failure();
            }
            window.unwrap()
        };

        assert_eq!(eject(&state), Duration::from_secs(30));
        time::advance(Duration::from_secs(30)).await;
        assert_eq!(eject(&state), Duration::from_secs(60));
        time::advance(Duration::from_secs(60)).await;
        assert_eq!(eject(&state), Duration::from_secs(120));
        time::advance(Duration::from_secs(120)).await;
        // Capped at max_ejection.
        assert_eq!(eject(&state), Duration::from_secs(120));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn success_after_readmission_decays_the_penalty() {
        let map = OutlierMap::new(policy());
        let state = map.handle(addr());

        for _ in 0..3 {
            state.record_failure();
        }
        time::advance(Duration::from_secs(30)).await;
        state.record_success();

        // The decayed count makes the next ejection start from base again.
        for i in 0..3 {
            assert_eq!(
                state.record_failure(),
                if i == 2 {
                    Some(Duration::from_secs(30))
                } else {
                    None
                }
            );
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn success_resets_the_failure_run() {
        let map = OutlierMap::new(policy());
        let state = map.handle(addr());

        state.record_failure();
        state.record_failure();
        state.record_success();
        state.record_failure();
        assert_eq!(state.record_failure(), None);
        assert!(!state.is_ejected());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn in_window_outcomes_do_not_charge_or_clear() {
        let map = OutlierMap::new(policy());
        let state = map.handle(addr());

        for _ in 0..3 {
            state.record_failure();
        }
        assert!(state.is_ejected());

        // Stragglers finishing mid-window change nothing.
        state.record_failure();
        state.record_success();
        assert!(state.is_ejected());

        // After re-admission a full new run is required to re-eject.
        time::advance(Duration::from_secs(30)).await;
        assert_eq!(state.record_failure(), None);
        assert_eq!(state.record_failure(), None);
        assert_eq!(state.record_failure(), Some(Duration::from_secs(60)));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn retain_prunes_departed_endpoints() {
        let map = OutlierMap::new(policy());
        let keep: SocketAddr = "10.0.0.1:8080".parse().unwrap();
        let gone: SocketAddr = "10.0.0.2:8080".parse().unwrap();
        map.handle(keep);
        let state = map.handle(gone);
        for _ in 0..3 {
            state.record_failure();
        }
        assert_eq!(map.ejected(), 1);

        map.retain(|a| *a == keep);
        assert_eq!(map.ejected(), 0);
    }
}
