//! The egress side of the proxy.
//!
//! Every accepted connection gets a [`Handler`]: a cheap clone of the shared
//! state plus that connection's original destination. Each request pins the
//! configuration snapshot current at arrival, resolves a route against the
//! outbound listener, and either enters a cluster's managed stack or falls
//! through untouched to wherever the client was already headed.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

mod dispatch;
mod handles;

pub use self::handles::{ClusterHandle, ClusterHandles};

use http::{Request, Response};
use hyper::client::HttpConnector;
use hyper::Body;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::warn;
use weft_app_core::control::{ConfigWatch, Control};
use weft_app_core::metrics::{Direction, Metrics, RouteLabels};
use weft_app_core::transport::OrigDstAddr;
use weft_policy::ListenerKind;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Builds per-connection handlers over one shared set of cluster stacks.
#[derive(Clone)]
pub struct Outbound {
    shared: Arc<Shared>,
    port: u16,
}

pub(crate) struct Shared {
    config: ConfigWatch,
    handles: ClusterHandles,
    client: hyper::Client<HttpConnector, Body>,
    metrics: Metrics,
}

/// Serves the requests of one accepted connection.
#[derive(Clone)]
pub struct Handler {
    shared: Arc<Shared>,
    orig_dst: Option<OrigDstAddr>,
    port: u16,
}

// === impl Outbound ===

impl Outbound {
    pub fn new(
        config: ConfigWatch,
        control: Control,
        zone: Option<Arc<str>>,
        metrics: Metrics,
        port: u16,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
        let client = hyper::Client::builder().build(connector);
        let handles = ClusterHandles::new(control, zone, metrics.balance.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                handles,
                client,
                metrics,
            }),
            port,
        }
    }

    /// Recomputes endpoint-state gauges, typically just before a scrape is
    /// rendered.
    pub fn refresh_gauges(&self) {
        self.shared.handles.refresh_gauges();
    }

    pub fn handler(&self, orig_dst: Option<OrigDstAddr>) -> Handler {
        Handler {
            shared: self.shared.clone(),
            orig_dst,
            port: self.port,
        }
    }
}

// === impl Handler ===

impl Handler {
    async fn proxy(self, req: Request<Body>) -> Response<Body> {
        // One snapshot governs the whole request, however long it runs.
        let snapshot = self.shared.config.borrow().clone();
        self.shared.handles.reconcile(&snapshot);

        let route = snapshot
            .listener_on(ListenerKind::Outbound, self.port)
            .and_then(|l| l.routes.iter().find(|(m, _)| m.matches(&req)))
            .map(|(_, route)| route);
        let Some(route) = route else {
            return dispatch::passthrough(&self.shared, self.orig_dst, req).await;
        };

        let cluster = dispatch::target_cluster(route, &req);
        let Some(handle) = self.shared.handles.get(&cluster) else {
            // Bundles are validated before publication, so a backend can
            // only dangle if that validation has a hole.
            warn!(%cluster, route = %route.name, "Route references an unknown cluster");
            return dispatch::bad_gateway();
        };

        let labels = RouteLabels {
            direction: Direction::Outbound,
            cluster: cluster.to_string(),
            route: route.name.to_string(),
        };
        dispatch::to_cluster(&self.shared, handle, labels, route, req).await
    }
}

impl tower::Service<Request<Body>> for Handler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.proxy(req).await) })
    }
}
