//! Prometheus metrics for the proxy and controller.
//!
//! All families are registered once at startup; the handles held here are
//! cheap to clone and are threaded through the stacks that record into them.
//! The admin server owns the [`prometheus_client::registry::Registry`] and
//! renders it with [`serve::Serve`].

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};
use std::time::Duration;

pub mod serve;

pub use self::serve::Serve;

/// Re-exports for binaries that assemble a registry themselves.
pub mod prom {
    pub use prometheus_client::registry::Registry;
}

/// Request latency buckets, in seconds.
const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResponseLabels {
    pub direction: Direction,
    pub cluster: String,
    pub route: String,
    pub status: u16,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    pub direction: Direction,
    pub cluster: String,
    pub route: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub cluster: String,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum EndpointState {
    Ready,
    Ejected,
    Draining,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointStateLabels {
    pub cluster: String,
    pub state: EndpointState,
}

/// Metrics recorded on the HTTP request path.
#[derive(Clone, Debug)]
pub struct HttpMetrics {
    responses: Family<ResponseLabels, Counter>,
    duration: Family<RouteLabels, Histogram>,
    sheds: Family<RouteLabels, Counter>,
    retries: Family<RouteLabels, Counter>,
    passthrough: Counter,
}

/// Metrics recorded by per-cluster balancers.
#[derive(Clone, Debug, Default)]
pub struct BalanceMetrics {
    endpoints: Family<EndpointStateLabels, Gauge>,
    ejections: Family<ClusterLabels, Counter>,
    spillovers: Family<ClusterLabels, Counter>,
}

/// Metrics recorded by the control-plane watch tasks.
#[derive(Clone, Debug, Default)]
pub struct ControlMetrics {
    snapshot_updates: Counter,
    reconnects: Counter,
    stale: Gauge,
}

/// The full proxy metric set.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub http: HttpMetrics,
    pub balance: BalanceMetrics,
    pub control: ControlMetrics,
}

// === impl Metrics ===

impl Metrics {
    /// Builds the metric set and registers every family under `registry`.
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        metrics.http.register(registry.sub_registry_with_prefix("http"));
        metrics
            .balance
            .register(registry.sub_registry_with_prefix("balance"));
        metrics
            .control
            .register(registry.sub_registry_with_prefix("control"));
        metrics
    }
}

// === impl HttpMetrics ===

impl Default for HttpMetrics {
    fn default() -> Self {
        Self {
            responses: Family::default(),
            duration: Family::new_with_constructor(|| {
                Histogram::new(DURATION_BUCKETS.iter().copied())
            }),
            sheds: Family::default(),
            retries: Family::default(),
            passthrough: Counter::default(),
        }
    }
}

impl HttpMetrics {
    fn register(&self, registry: &mut Registry) {
        registry.register(
            "responses",
            "Completed responses, by route and status",
            self.responses.clone(),
        );
        registry.register(
            "request_duration_seconds",
            "Time from request dispatch to response completion",
            self.duration.clone(),
        );
        registry.register(
            "sheds",
            "Requests refused because the destination cluster was at its concurrency limit",
            self.sheds.clone(),
        );
        registry.register(
            "retries",
            "Requests re-dispatched after a retryable failure",
            self.retries.clone(),
        );
        registry.register(
            "passthrough",
            "Requests forwarded without a matching route",
            self.passthrough.clone(),
        );
    }

    pub fn response(&self, labels: ResponseLabels, elapsed: Duration) {
        let route = RouteLabels {
            direction: labels.direction,
            cluster: labels.cluster.clone(),
            route: labels.route.clone(),
        };
        self.responses.get_or_create(&labels).inc();
        self.duration
            .get_or_create(&route)
            .observe(elapsed.as_secs_f64());
    }

    pub fn shed(&self, labels: &RouteLabels) {
        self.sheds.get_or_create(labels).inc();
    }

    pub fn retry(&self, labels: &RouteLabels) {
        self.retries.get_or_create(labels).inc();
    }

    pub fn passthrough(&self) {
        self.passthrough.inc();
    }
}

// === impl BalanceMetrics ===

impl BalanceMetrics {
    fn register(&self, registry: &mut Registry) {
        registry.register(
            "endpoints",
            "Endpoints known to a cluster's balancer, by state",
            self.endpoints.clone(),
        );
        registry.register(
            "ejections",
            "Endpoints ejected after consecutive failures",
            self.ejections.clone(),
        );
        registry.register(
            "zone_spillovers",
            "Dispatches that crossed zones because the local zone was below its ready ratio",
            self.spillovers.clone(),
        );
    }

    pub fn set_endpoints(&self, cluster: &str, state: EndpointState, count: usize) {
        self.endpoints
            .get_or_create(&EndpointStateLabels {
                cluster: cluster.to_string(),
                state,
            })
            .set(count as i64);
    }

    pub fn ejection(&self, cluster: &str) {
        self.ejections
            .get_or_create(&ClusterLabels {
                cluster: cluster.to_string(),
            })
            .inc();
    }

    pub fn spillover(&self, cluster: &str) {
        self.spillovers
            .get_or_create(&ClusterLabels {
                cluster: cluster.to_string(),
            })
            .inc();
    }

    /// Drops the per-cluster series when a cluster is removed from
    /// configuration so the admin endpoint does not report it forever.
    pub fn forget_cluster(&self, cluster: &str) {
        for state in [
            EndpointState::Ready,
            EndpointState::Ejected,
            EndpointState::Draining,
        ] {
            self.endpoints.remove(&EndpointStateLabels {
                cluster: cluster.to_string(),
                state,
            });
        }
    }
}

// === impl ControlMetrics ===

impl ControlMetrics {
    fn register(&self, registry: &mut Registry) {
        registry.register(
            "snapshot_updates",
            "Configuration snapshots applied",
            self.snapshot_updates.clone(),
        );
        registry.register(
            "stream_reconnects",
            "Watch streams re-established after a disconnect",
            self.reconnects.clone(),
        );
        registry.register(
            "stale",
            "One while the proxy is serving its last-known configuration without a control-plane connection",
            self.stale.clone(),
        );
    }

    pub fn snapshot_update(&self) {
        self.snapshot_updates.inc();
    }

    pub fn reconnect(&self) {
        self.reconnects.inc();
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.set(if stale { 1 } else { 0 });
    }
}
