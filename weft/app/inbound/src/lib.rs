//! The ingress side of the proxy.
//!
//! Deliberately thin: inbound routes select policy, never destination. Every
//! intercepted request is forwarded to the colocated workload over loopback,
//! behind a concurrency window so ingress overload sheds at the sidecar
//! instead of queuing into the application. Retry policies on inbound routes
//! are not honored; replaying into a struggling local process only amplifies
//! its load.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

use http::{Request, Response, StatusCode};
use hyper::client::HttpConnector;
use hyper::Body;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};
use weft_app_core::classify;
use weft_app_core::control::ConfigWatch;
use weft_app_core::http::{rewrite_to, shed_response, synthesized};
use weft_limit::GradientLimit;
use weft_metrics::{Direction, HttpMetrics, Metrics, ResponseLabels, RouteLabels};
use weft_policy::{Cluster, LimitPolicy, ListenerKind};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Builds per-connection handlers for intercepted ingress.
#[derive(Clone)]
pub struct Inbound {
    shared: Arc<Shared>,
}

struct Shared {
    config: ConfigWatch,
    client: hyper::Client<HttpConnector, Body>,
    app: SocketAddr,
    port: u16,
    window: Mutex<Window>,
    metrics: Metrics,
}

/// The workload's window and the cluster definition it was built from.
struct Window {
    source: Option<Arc<Cluster>>,
    limit: GradientLimit,
}

/// Serves the requests of one accepted connection.
#[derive(Clone)]
pub struct Handler {
    shared: Arc<Shared>,
}

// === impl Inbound ===

impl Inbound {
    pub fn new(config: ConfigWatch, port: u16, app_port: u16, metrics: Metrics) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
        let client = hyper::Client::builder().build(connector);
        Self {
            shared: Arc::new(Shared {
                config,
                client,
                app: SocketAddr::from(([127, 0, 0, 1], app_port)),
                port,
                window: Mutex::new(Window {
                    source: None,
                    limit: GradientLimit::new(LimitPolicy::default()),
                }),
                metrics,
            }),
        }
    }

    pub fn handler(&self) -> Handler {
        Handler {
            shared: self.shared.clone(),
        }
    }
}

// === impl Shared ===

impl Shared {
    /// The workload window, rebuilt only when the local cluster's definition
    /// changes. A policy edit legitimately resets the adaptive state.
    fn window(&self, cluster: Option<&Arc<Cluster>>) -> GradientLimit {
        let mut window = self.window.lock();
        if let Some(cluster) = cluster {
            let changed = window.source.as_ref().map_or(true, |cur| **cur != **cluster);
            if changed {
                debug!(cluster = %cluster.name, "Rebuilding the workload window");
                window.limit = GradientLimit::new(cluster.limit);
                window.source = Some(cluster.clone());
            }
        }
        window.limit.clone()
    }
}

// === impl Handler ===

impl Handler {
    async fn proxy(self, req: Request<Body>) -> Response<Body> {
        let snapshot = self.shared.config.borrow().clone();
        let route = snapshot
            .listener_on(ListenerKind::Inbound, self.shared.port)
            .and_then(|l| l.routes.iter().find(|(m, _)| m.matches(&req)))
            .map(|(_, route)| route);
        let cluster = route
            .and_then(|r| r.backends.first())
            .and_then(|b| snapshot.clusters.get(&b.cluster));

        let labels = RouteLabels {
            direction: Direction::Inbound,
            cluster: cluster
                .map(|c| c.name.to_string())
                .unwrap_or_else(|| "local".to_string()),
            route: route
                .map(|r| r.name.to_string())
                .unwrap_or_else(|| "default".to_string()),
        };

        let start = Instant::now();
        let limit = self.shared.window(cluster);
        let Some(permit) = limit.try_acquire() else {
            debug!("Shedding");
            self.shared.metrics.http.shed(&labels);
            return finish(&self.shared.metrics.http, labels, start, shed_response());
        };

        let timeout = route.and_then(|r| r.timeout);
        let rsp = self.forward(timeout, req).await;

        if classify::of_response(&rsp).is_success() {
            permit.complete();
        } else {
            drop(permit);
        }
        finish(&self.shared.metrics.http, labels, start, rsp)
    }

    async fn forward(&self, timeout: Option<Duration>, mut req: Request<Body>) -> Response<Body> {
        if let Err(error) = rewrite_to(&mut req, self.shared.app) {
            warn!(%error, "Request target cannot be rewritten");
            return synthesized(StatusCode::BAD_GATEWAY);
        }

        let call = self.shared.client.request(req);
        let outcome = match timeout {
            Some(timeout) => match time::timeout(timeout, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(?timeout, "Route timeout elapsed");
                    return synthesized(StatusCode::GATEWAY_TIMEOUT);
                }
            },
            None => call.await,
        };
        match outcome {
            Ok(rsp) => rsp,
            Err(error) => {
                debug!(%error, "Workload request failed");
                synthesized(StatusCode::BAD_GATEWAY)
            }
        }
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

fn finish(
    metrics: &HttpMetrics,
    labels: RouteLabels,
    start: Instant,
    rsp: Response<Body>,
) -> Response<Body> {
    metrics.response(
        ResponseLabels {
            direction: labels.direction,
            cluster: labels.cluster,
            route: labels.route,
            status: rsp.status().as_u16(),
        },
        start.elapsed(),
    );
    rsp
}
