//! The control-plane client.
//!
//! The proxy subscribes to its configuration and to endpoint membership over
//! server-streaming RPCs. Each subscription feeds a `tokio::sync::watch`
//! channel that always holds the last good value, so losing the controller
//! never takes away a configuration the proxy already has. Streams reconnect
//! with exponential backoff indefinitely; there is no fatal controller error.

use crate::config::ControlConfig;
use futures::prelude::*;
use std::{pin::Pin, sync::Arc, time::Duration};
use tokio::{sync::watch, time::Instant};
use tonic::transport;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use weft_api::discovery::v1 as pb;
use weft_api::discovery::v1::discovery_client::DiscoveryClient;
use weft_api::registry::v1 as pb_registry;
use weft_error::Error;
use weft_exp_backoff::{ExponentialBackoff, ExponentialBackoffStream};
use weft_metrics::ControlMetrics;
use weft_policy::{proto, ConfigSnapshot, Endpoint};

/// Watches the control plane on behalf of one workload.
#[derive(Clone, Debug)]
pub struct Control {
    client: DiscoveryClient<transport::Channel>,
    workload: Arc<str>,
    backoff: ExponentialBackoff,
    stale_after: Duration,
    metrics: ControlMetrics,
}

pub type ConfigWatch = watch::Receiver<Arc<ConfigSnapshot>>;

pub type EndpointsWatch = watch::Receiver<Arc<[Endpoint]>>;

/// Publishes configuration bundles into a watch.
///
/// Staleness is driven by stream liveness, not by update frequency: a healthy
/// stream with nothing new to send keeps the configuration fresh.
struct ConfigPublisher {
    link: Link,
    stale_after: Duration,
    stale: bool,
}

/// Tracks one stream's connectivity for reconnect accounting.
struct Link {
    metrics: ControlMetrics,
    connected_once: bool,
    down_since: Option<Instant>,
}

// === impl Control ===

impl Control {
    /// Builds a client for the configured controller address.
    ///
    /// The underlying channel connects lazily, so construction cannot block
    /// and an unreachable controller surfaces as stream errors instead.
    pub fn new(
        config: &ControlConfig,
        workload: impl Into<Arc<str>>,
        metrics: ControlMetrics,
    ) -> Result<Self, Error> {
        let channel = transport::Endpoint::from_shared(format!("http://{}", config.addr))?
            .connect_timeout(config.connect_timeout)
            .connect_lazy();
        Ok(Self {
            client: DiscoveryClient::new(channel),
            workload: workload.into(),
            backoff: config.backoff,
            stale_after: config.stale_after,
            metrics,
        })
    }

    /// Spawns a watch that keeps the configuration snapshot current, starting
    /// from `initial`.
    ///
    /// The task exits when every receiver has been dropped.
    pub fn spawn_config_watch(&self, initial: Arc<ConfigSnapshot>) -> ConfigWatch {
        let (tx, rx) = watch::channel(initial);
        let control = self.clone();
        tokio::spawn(async move { control.run_config(tx).await }.instrument(info_span!("config")));
        rx
    }

    /// Spawns a watch of one registry service's endpoint membership. The set
    /// is empty until the registry reports.
    pub fn spawn_endpoints_watch(&self, service: impl Into<Arc<str>>) -> EndpointsWatch {
        let service = service.into();
        let (tx, rx) = watch::channel(Arc::from(Vec::new()));
        let control = self.clone();
        let span = info_span!("endpoints", service = %service);
        tokio::spawn(async move { control.run_endpoints(service, tx).await }.instrument(span));
        rx
    }

    async fn run_config(self, tx: watch::Sender<Arc<ConfigSnapshot>>) {
        let mut publisher = ConfigPublisher::new(self.metrics.clone(), self.stale_after);
        let mut backoff: Option<Pin<Box<ExponentialBackoffStream>>> = None;
        let mut client = self.client.clone();

        loop {
            let req = pb::ConfigRequest {
                workload: self.workload.to_string(),
            };
            let rsp = tokio::select! {
                _ = tx.closed() => return,
                rsp = client.watch_config(req) => rsp,
            };
            match rsp {
                Ok(rsp) => {
                    publisher.connected();
                    // A fresh connection restarts the backoff schedule.
                    backoff = None;
                    let mut updates = rsp.into_inner();
                    loop {
                        let update = tokio::select! {
                            _ = tx.closed() => return,
                            update = updates.message() => update,
                        };
                        match update {
                            Ok(Some(bundle)) => publisher.apply(bundle, &tx),
                            Ok(None) => {
                                debug!("Configuration stream ended");
                                break;
                            }
                            Err(status) => {
                                debug!(%status, "Configuration stream failed");
                                break;
                            }
                        }
                    }
                }
                Err(status) => debug!(%status, "Failed to establish configuration stream"),
            }

            publisher.disconnected();
            let delay = backoff.get_or_insert_with(|| Box::pin(self.backoff.stream()));
            tokio::select! {
                _ = tx.closed() => return,
                _ = delay.next() => {}
            }
        }
    }

    async fn run_endpoints(self, service: Arc<str>, tx: watch::Sender<Arc<[Endpoint]>>) {
        let mut link = Link::new(self.metrics.clone());
        let mut backoff: Option<Pin<Box<ExponentialBackoffStream>>> = None;
        let mut client = self.client.clone();

        loop {
            let req = pb::EndpointsRequest {
                workload: self.workload.to_string(),
                service: service.to_string(),
            };
            let rsp = tokio::select! {
                _ = tx.closed() => return,
                rsp = client.watch_endpoints(req) => rsp,
            };
            match rsp {
                Ok(rsp) => {
                    link.connected();
                    backoff = None;
                    let mut updates = rsp.into_inner();
                    loop {
                        let update = tokio::select! {
                            _ = tx.closed() => return,
                            update = updates.message() => update,
                        };
                        match update {
                            Ok(Some(set)) => publish_endpoints(&set, &tx),
                            Ok(None) => {
                                debug!("Endpoint stream ended");
                                break;
                            }
                            Err(status) => {
                                debug!(%status, "Endpoint stream failed");
                                break;
                            }
                        }
                    }
                }
                Err(status) => debug!(%status, "Failed to establish endpoint stream"),
            }

            link.disconnected();
            let delay = backoff.get_or_insert_with(|| Box::pin(self.backoff.stream()));
            tokio::select! {
                _ = tx.closed() => return,
                _ = delay.next() => {}
            }
        }
    }
}

fn publish_endpoints(set: &pb_registry::EndpointSet, tx: &watch::Sender<Arc<[Endpoint]>>) {
    let (endpoints, dropped) = proto::endpoints_from_proto(set);
    if dropped > 0 {
        info!(dropped, "Ignoring undecodable endpoints");
    }
    let count = endpoints.len();
    let endpoints: Arc<[Endpoint]> = endpoints.into();
    let updated = tx.send_if_modified(move |current| {
        if **current == *endpoints {
            return false;
        }
        *current = endpoints;
        true
    });
    if updated {
        debug!(endpoints = count, "Endpoints updated");
    }
}

// === impl ConfigPublisher ===

impl ConfigPublisher {
    fn new(metrics: ControlMetrics, stale_after: Duration) -> Self {
        Self {
            link: Link::new(metrics),
            stale_after,
            stale: false,
        }
    }

    fn connected(&mut self) {
        self.link.connected();
        if self.stale {
            self.stale = false;
            self.link.metrics.set_stale(false);
            info!("Control-plane connection restored");
        }
    }

    fn disconnected(&mut self) {
        let down = self.link.disconnected();
        if !self.stale && down >= self.stale_after {
            self.stale = true;
            self.link.metrics.set_stale(true);
            warn!(
                down_for = ?down,
                "Serving last-known configuration; control plane is unreachable"
            );
        }
    }

    fn apply(&mut self, bundle: pb::ConfigBundle, tx: &watch::Sender<Arc<ConfigSnapshot>>) {
        let unchanged = *tx.borrow().version == *bundle.version;
        if unchanged {
            trace!(version = %bundle.version, "Configuration unchanged");
            return;
        }
        match ConfigSnapshot::try_from(bundle) {
            Ok(snapshot) => {
                info!(
                    version = %snapshot.version,
                    listeners = snapshot.listeners.len(),
                    clusters = snapshot.clusters.len(),
                    "Applying configuration"
                );
                tx.send_replace(Arc::new(snapshot));
                self.link.metrics.snapshot_update();
            }
            // The last good snapshot stays in effect.
            Err(error) => warn!(%error, "Ignoring invalid configuration bundle"),
        }
    }
}

// === impl Link ===

impl Link {
    fn new(metrics: ControlMetrics) -> Self {
        Self {
            metrics,
            connected_once: false,
            down_since: None,
        }
    }

    fn connected(&mut self) {
        if self.connected_once && self.down_since.is_some() {
            self.metrics.reconnect();
        }
        self.connected_once = true;
        self.down_since = None;
    }

    /// Records a disconnect, returning how long the stream has been down.
    fn disconnected(&mut self) -> Duration {
        self.down_since.get_or_insert_with(Instant::now).elapsed()
    }
}
