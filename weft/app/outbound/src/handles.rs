//! Per-cluster live state.
//!
//! A handle carries the adaptive pieces of one cluster's request path: the
//! concurrency window, outlier accrual, and the balancer over its live
//! endpoint set. Handles are keyed by cluster name and survive snapshot
//! replacement, so an edit elsewhere in the bundle does not reset adaptive
//! state that took minutes to converge. A handle is rebuilt only when its own
//! cluster definition changes, and dropped when a snapshot stops naming it.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info_span, Instrument};
use weft_app_core::control::Control;
use weft_balance::{Balancer, Counts, EndpointSet, Pick};
use weft_limit::GradientLimit;
use weft_metrics::{BalanceMetrics, EndpointState};
use weft_policy::{Cluster, ClusterName, ConfigSnapshot, Discovery};

/// The live handle set, reconciled against the current snapshot.
#[derive(Debug)]
pub struct ClusterHandles {
    control: Control,
    zone: Option<Arc<str>>,
    metrics: BalanceMetrics,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// The snapshot version the handle set was last reconciled against.
    version: Option<Arc<str>>,
    handles: HashMap<ClusterName, Arc<ClusterHandle>>,
}

/// One cluster's adaptive state.
#[derive(Debug)]
pub struct ClusterHandle {
    cluster: Arc<Cluster>,
    limit: GradientLimit,
    outliers: Option<Arc<weft_outlier::OutlierMap>>,
    balancer: Balancer,
    endpoints: Arc<RwLock<EndpointSet>>,
}

// === impl ClusterHandles ===

impl ClusterHandles {
    pub fn new(control: Control, zone: Option<Arc<str>>, metrics: BalanceMetrics) -> Self {
        Self {
            control,
            zone,
            metrics,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Brings the handle set in line with `snapshot`.
    ///
    /// Returns immediately when the snapshot version has already been
    /// reconciled, so calling this per request costs one lock and a string
    /// compare in the steady state.
    pub fn reconcile(&self, snapshot: &ConfigSnapshot) {
        let mut inner = self.inner.lock();
        if inner.version.as_deref() == Some(&*snapshot.version) {
            return;
        }

        let metrics = &self.metrics;
        inner.handles.retain(|name, _| {
            let keep = snapshot.clusters.contains_key(name);
            if !keep {
                debug!(cluster = %name, "Dropping cluster");
                metrics.forget_cluster(name);
            }
            keep
        });

        for (name, cluster) in snapshot.clusters.iter() {
            match inner.handles.get(name) {
                Some(handle) if handle.cluster == *cluster => continue,
                Some(_) => debug!(cluster = %name, "Cluster definition changed"),
                None => debug!(cluster = %name, "New cluster"),
            }
            let handle = ClusterHandle::spawn(cluster.clone(), self);
            inner.handles.insert(name.clone(), handle);
        }

        inner.version = Some(snapshot.version.clone());
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClusterHandle>> {
        self.inner.lock().handles.get(name).cloned()
    }

    /// Re-reports endpoint-state gauges from live handle state, so a scrape
    /// observes ejections that expired without a membership delivery.
    pub fn refresh_gauges(&self) {
        let handles: Vec<_> = self.inner.lock().handles.values().cloned().collect();
        for handle in handles {
            report(&self.metrics, &handle.cluster.name, handle.counts());
        }
    }

}

// === impl ClusterHandle ===

impl ClusterHandle {
    fn spawn(cluster: Arc<Cluster>, owner: &ClusterHandles) -> Arc<Self> {
        let limit = GradientLimit::new(cluster.limit);
        let outliers = cluster
            .outlier
            .map(|policy| Arc::new(weft_outlier::OutlierMap::new(policy)));
        let balancer = Balancer::new(cluster.balancer, owner.zone.clone());
        let endpoints = Arc::new(RwLock::new(EndpointSet::new()));

        match &cluster.discovery {
            Discovery::Static(eps) => {
                let mut set = endpoints.write();
                set.update(eps, outliers.as_deref());
                report(&owner.metrics, &cluster.name, set.counts());
            }
            Discovery::Registry { service } => {
                let mut watch = owner.control.spawn_endpoints_watch(service.clone());
                let state = Arc::downgrade(&endpoints);
                let outliers = outliers.clone();
                let metrics = owner.metrics.clone();
                let name = cluster.name.clone();
                let span = info_span!("cluster", name = %name);
                tokio::spawn(
                    async move {
                        loop {
                            let eps = watch.borrow_and_update().clone();
                            // The handle owns the set; when it goes, so do we.
                            let Some(state) = state.upgrade() else { return };
                            {
                                let mut set = state.write();
                                set.update(&eps, outliers.as_deref());
                                report(&metrics, &name, set.counts());
                            }
                            drop(state);
                            if watch.changed().await.is_err() {
                                return;
                            }
                        }
                    }
                    .instrument(span),
                );
            }
        }

        Arc::new(Self {
            cluster,
            limit,
            outliers,
            balancer,
            endpoints,
        })
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn limit(&self) -> &GradientLimit {
        &self.limit
    }

    /// Picks an endpoint from the live set.
    pub fn select(&self) -> Option<Pick> {
        self.balancer.select(&self.endpoints.read())
    }

    pub fn counts(&self) -> Counts {
        self.endpoints.read().counts()
    }

    #[cfg(test)]
    pub(crate) fn has_outliers(&self) -> bool {
        self.outliers.is_some()
    }
}

fn report(metrics: &BalanceMetrics, cluster: &str, counts: Counts) {
    metrics.set_endpoints(cluster, EndpointState::Ready, counts.ready);
    metrics.set_endpoints(cluster, EndpointState::Ejected, counts.ejected);
    metrics.set_endpoints(cluster, EndpointState::Draining, counts.draining);
}
