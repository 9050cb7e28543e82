//! Configuration domain model shared by the proxy and the controller.
//!
//! A proxy's entire view of the world is one immutable [`ConfigSnapshot`]:
//! listeners, routes, and clusters, versioned by a digest of their content.
//! Snapshots are never mutated; configuration changes produce a replacement
//! snapshot that takes effect atomically when the proxy swaps one `Arc`.
//!
//! Endpoint membership is deliberately *not* part of the snapshot. It churns
//! continuously and is streamed per cluster; see the balancer for how the two
//! halves meet.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

pub mod intent;
pub mod proto;
mod route;

pub use self::{
    intent::Intent,
    proto::InvalidConfig,
    route::{request_authority, HeaderOverride, RetryPolicy, Route, RouteMatch, WeightedBackend},
};

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

pub type ClusterName = Arc<str>;

/// One network-addressable instance of a service.
///
/// Endpoints are produced by registry churn and read by balancers; the
/// request path never mutates them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub zone: Option<Arc<str>>,
    pub weight: u32,
    pub health: Health,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Health {
    Healthy,
    Unhealthy,
    Draining,
}

/// A named logical upstream, one per declared dependency.
///
/// Immutable once computed for a config version; the next version replaces it
/// wholesale.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub name: ClusterName,
    pub discovery: Discovery,
    pub balancer: Balancer,
    /// `None` disables outlier ejection, e.g. for the synthesized local
    /// cluster where ejecting the only endpoint would blackhole the workload.
    pub outlier: Option<OutlierPolicy>,
    pub limit: LimitPolicy,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Discovery {
    /// Fixed membership carried in the snapshot itself.
    Static(Arc<[Endpoint]>),
    /// Membership streamed from the control plane, keyed by registry service.
    Registry { service: Arc<str> },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Balancer {
    RoundRobin,
    /// Prefer same-zone endpoints while at least `min_zone_ratio` of the
    /// cluster's ready endpoints are local; otherwise spill over to all.
    ZoneAware { min_zone_ratio: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutlierPolicy {
    pub consecutive_failures: u32,
    pub base_ejection: Duration,
    pub max_ejection: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LimitPolicy {
    pub initial: u32,
    pub min: u32,
    pub max: u32,
    /// Latency degradation tolerated before the limit decreases, as a ratio
    /// over the observed baseline.
    pub tolerance: f64,
}

/// A bound proxy port and the routes evaluated on it, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    pub name: Arc<str>,
    pub kind: ListenerKind,
    pub port: u16,
    pub routes: Arc<[(RouteMatch, Route)]>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerKind {
    Inbound,
    Outbound,
}

/// An immutable, versioned bundle of listeners, routes, and clusters.
///
/// The request path pins the snapshot it started with for its whole lifetime,
/// so a swap mid-request can never produce a torn read.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigSnapshot {
    pub version: Arc<str>,
    pub listeners: Arc<[Listener]>,
    pub clusters: Arc<HashMap<ClusterName, Arc<Cluster>>>,
}

// === impl Health ===

impl Health {
    pub fn is_ready(self) -> bool {
        matches!(self, Health::Healthy)
    }
}

// === impl OutlierPolicy ===

impl Default for OutlierPolicy {
    fn default() -> Self {
        Self {
            consecutive_failures: 5,
            base_ejection: Duration::from_secs(30),
            max_ejection: Duration::from_secs(300),
        }
    }
}

// === impl LimitPolicy ===

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            initial: 100,
            min: 10,
            max: 1000,
            tolerance: 2.0,
        }
    }
}

// === impl ConfigSnapshot ===

impl ConfigSnapshot {
    pub fn listener_on(&self, kind: ListenerKind, port: u16) -> Option<&Listener> {
        self.listeners
            .iter()
            .find(|l| l.kind == kind && l.port == port)
    }

    pub fn cluster(&self, name: &str) -> Option<&Arc<Cluster>> {
        self.clusters.get(name)
    }
}
