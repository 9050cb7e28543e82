//! Endpoint selection for one cluster.
//!
//! An [`EndpointSet`] is the balancer's view of a cluster's membership,
//! rebuilt wholesale on every delivery. A [`Balancer`] picks among the
//! eligible members: healthy, weight above zero, and not currently ejected
//! by outlier detection. Draining endpoints stay in the set (their gauge is
//! reported) but receive no new requests.
//!
//! Zone-aware mode prefers endpoints in the proxy's own zone and spills over
//! to the whole set when in-zone ready capacity drops below the policy's
//! minimum fraction of in-zone membership, so a sick zone degrades into
//! cross-zone traffic instead of failures.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

use ahash::{HashSet, HashSetExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;
use weft_outlier::{OutlierMap, OutlierState};
use weft_policy::{Balancer as Policy, Endpoint, Health};

/// A cluster's live membership with per-endpoint outlier handles resolved.
#[derive(Debug, Default)]
pub struct EndpointSet {
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    endpoint: Endpoint,
    outlier: Option<Arc<OutlierState>>,
}

/// Gauge fodder describing an [`EndpointSet`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub ready: usize,
    pub ejected: usize,
    pub draining: usize,
}

/// Picks endpoints for requests.
///
/// The cursor is shared by all clones' owner, so concurrent requests spread
/// across the eligible set instead of dogpiling one endpoint.
#[derive(Debug)]
pub struct Balancer {
    policy: Policy,
    local_zone: Option<Arc<str>>,
    cursor: AtomicUsize,
}

/// One selection outcome.
#[derive(Clone, Debug)]
pub struct Pick {
    pub addr: SocketAddr,
    pub outlier: Option<Arc<OutlierState>>,
    /// Zone-aware selection widened to every zone for this request.
    pub spilled: bool,
}

// === impl EndpointSet ===

impl EndpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the membership, resolving outlier handles for each endpoint
    /// and pruning accrual state for members that left.
    pub fn update(&mut self, endpoints: &[Endpoint], outliers: Option<&OutlierMap>) {
        self.entries = endpoints
            .iter()
            .map(|endpoint| Entry {
                outlier: outliers.map(|m| m.handle(endpoint.addr)),
                endpoint: endpoint.clone(),
            })
            .collect();

        if let Some(outliers) = outliers {
            let mut live = HashSet::with_capacity(self.entries.len());
            live.extend(self.entries.iter().map(|e| e.endpoint.addr));
            outliers.retain(|addr| live.contains(addr));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for entry in &self.entries {
            match entry.endpoint.health {
                Health::Draining => counts.draining += 1,
                Health::Healthy if entry.is_ejected() => counts.ejected += 1,
                Health::Healthy => counts.ready += 1,
                Health::Unhealthy => {}
            }
        }
        counts
    }
}

// === impl Entry ===

impl Entry {
    fn is_ejected(&self) -> bool {
        self.outlier.as_deref().is_some_and(OutlierState::is_ejected)
    }

    fn is_eligible(&self) -> bool {
        self.endpoint.health.is_ready() && self.endpoint.weight > 0 && !self.is_ejected()
    }

    fn in_zone(&self, zone: &str) -> bool {
        self.endpoint.zone.as_deref() == Some(zone)
    }

    fn to_pick(&self, spilled: bool) -> Pick {
        Pick {
            addr: self.endpoint.addr,
            outlier: self.outlier.clone(),
            spilled,
        }
    }
}

// === impl Balancer ===

impl Balancer {
    pub fn new(policy: Policy, local_zone: Option<Arc<str>>) -> Self {
        Self {
            policy,
            local_zone,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Picks an eligible endpoint, or `None` when the set has no capacity.
    pub fn select(&self, set: &EndpointSet) -> Option<Pick> {
        match (&self.policy, self.local_zone.as_deref()) {
            (Policy::RoundRobin, _) | (Policy::ZoneAware { .. }, None) => {
                self.pick(set, None).map(|e| e.to_pick(false))
            }
            (Policy::ZoneAware { min_zone_ratio }, Some(zone)) => {
                let members = set.entries.iter().filter(|e| e.in_zone(zone)).count();
                let ready = set
                    .entries
                    .iter()
                    .filter(|e| e.in_zone(zone) && e.is_eligible())
                    .count();
                let spill = members == 0 || (ready as f64) < min_zone_ratio * (members as f64);
                if spill {
                    trace!(zone, ready, members, "Spilling over");
                    self.pick(set, None).map(|e| e.to_pick(true))
                } else {
                    self.pick(set, Some(zone)).map(|e| e.to_pick(false))
                }
            }
        }
    }

    fn pick<'s>(&self, set: &'s EndpointSet, zone: Option<&str>) -> Option<&'s Entry> {
        let eligible =
            |e: &&Entry| e.is_eligible() && zone.map(|z| e.in_zone(z)).unwrap_or(true);
        let n = set.entries.iter().filter(eligible).count();
        if n == 0 {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        set.entries.iter().filter(eligible).nth(i)
    }
}
