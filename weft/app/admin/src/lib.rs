//! Serves the proxy's HTTP admin server.
//!
//! * `GET /live` -- returns 200 when the proxy is live.
//! * `GET /ready` -- returns 200 once the proxy is serving meshed traffic.
//! * `GET /metrics` -- reports prometheus-formatted metrics.
//! * `GET /config_dump` -- reports the configuration snapshot in effect.
//! * `POST /shutdown` -- shuts down the proxy (when enabled; localhost only).

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

mod readiness;

pub use self::readiness::Readiness;

use http::{header, Method, Request, Response, StatusCode};
use hyper::Body;
use serde_json::json;
use std::convert::Infallible;
use std::future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::error;
use weft_app_core::control::ConfigWatch;
use weft_metrics::Serve;
use weft_policy::{ConfigSnapshot, Discovery, ListenerKind};

/// Recomputes scrape-time gauges just before the registry renders.
pub type RefreshGauges = Arc<dyn Fn() + Send + Sync>;

/// Builds per-connection handlers for the admin port.
#[derive(Clone)]
pub struct Admin {
    shared: Arc<Shared>,
}

struct Shared {
    metrics: Serve,
    config: ConfigWatch,
    ready: Readiness,
    refresh: RefreshGauges,
    shutdown_tx: mpsc::UnboundedSender<()>,
    enable_shutdown: bool,
}

/// Serves the requests of one accepted admin connection.
#[derive(Clone)]
pub struct Handler {
    shared: Arc<Shared>,
    client: SocketAddr,
}

// === impl Admin ===

impl Admin {
    pub fn new(
        metrics: Serve,
        config: ConfigWatch,
        ready: Readiness,
        refresh: RefreshGauges,
        shutdown_tx: mpsc::UnboundedSender<()>,
        enable_shutdown: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                metrics,
                config,
                ready,
                refresh,
                shutdown_tx,
                enable_shutdown,
            }),
        }
    }

    pub fn handler(&self, client: SocketAddr) -> Handler {
        Handler {
            shared: self.shared.clone(),
            client,
        }
    }
}

// === impl Handler ===

impl Handler {
    fn route<B>(&self, req: Request<B>) -> Response<Body> {
        match req.uri().path() {
            "/live" => live_rsp(),
            "/ready" => self.ready_rsp(),
            "/metrics" => self.metrics_rsp(),
            "/config_dump" => self.config_rsp(),
            "/shutdown" => {
                if req.method() != Method::POST {
                    return method_not_allowed();
                }
                if !self.client_is_localhost() {
                    return forbidden_not_localhost();
                }
                self.shutdown()
            }
            _ => not_found(),
        }
    }

    fn ready_rsp(&self) -> Response<Body> {
        if self.shared.ready.get() {
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("ready\n"))
                .expect("builder with known status code must not fail")
        } else {
            Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .body(Body::from("not ready\n"))
                .expect("builder with known status code must not fail")
        }
    }

    fn metrics_rsp(&self) -> Response<Body> {
        (self.shared.refresh)();
        match self.shared.metrics.encode() {
            Ok(metrics) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, Serve::CONTENT_TYPE)
                .body(Body::from(metrics))
                .expect("builder with known status code must not fail"),
            Err(error) => {
                error!(%error, "Failed to format metrics");
                internal_error_rsp(error)
            }
        }
    }

    fn config_rsp(&self) -> Response<Body> {
        let snapshot = self.shared.config.borrow().clone();
        match serde_json::to_vec_pretty(&dump(&snapshot)) {
            Ok(buf) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(buf))
                .expect("builder with known status code must not fail"),
            Err(error) => {
                error!(%error, "Failed to serialize the configuration snapshot");
                internal_error_rsp(error)
            }
        }
    }

    fn shutdown(&self) -> Response<Body> {
        if !self.shared.enable_shutdown {
            return Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("shutdown endpoint is not enabled\n"))
                .expect("builder with known status code must not fail");
        }
        if self.shared.shutdown_tx.send(()).is_ok() {
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("shutdown\n"))
                .expect("builder with known status code must not fail")
        } else {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("shutdown listener dropped\n"))
                .expect("builder with known status code must not fail")
        }
    }

    fn client_is_localhost(&self) -> bool {
        match self.client.ip() {
            std::net::IpAddr::V4(v4) => v4.is_loopback(),
            std::net::IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .map(|v4| v4.is_loopback())
                .unwrap_or_else(|| v6.is_loopback()),
        }
    }
}

impl<B> tower::Service<Request<B>> for Handler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::Ready<Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        future::ready(Ok(self.route(req)))
    }
}

/// A reviewable summary of the live snapshot. Matching detail is elided; the
/// authoritative form is the intent document this was computed from.
fn dump(snapshot: &ConfigSnapshot) -> serde_json::Value {
    json!({
        "version": &*snapshot.version,
        "listeners": snapshot
            .listeners
            .iter()
            .map(|l| {
                json!({
                    "name": &*l.name,
                    "kind": match l.kind {
                        ListenerKind::Inbound => "inbound",
                        ListenerKind::Outbound => "outbound",
                    },
                    "port": l.port,
                    "routes": l
                        .routes
                        .iter()
                        .map(|(_, r)| {
                            json!({
                                "name": &*r.name,
                                "backends": r
                                    .backends
                                    .iter()
                                    .map(|b| json!({
                                        "cluster": &*b.cluster,
                                        "weight": b.weight,
                                    }))
                                    .collect::<Vec<_>>(),
                                "timeout_ms": r.timeout.map(|t| t.as_millis() as u64),
                            })
                        })
                        .collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>(),
        "clusters": snapshot
            .clusters
            .values()
            .map(|c| {
                json!({
                    "name": &*c.name,
                    "discovery": match &c.discovery {
                        Discovery::Static(endpoints) => json!({ "static": endpoints.len() }),
                        Discovery::Registry { service } => json!({ "registry": &**service }),
                    },
                    "concurrency": { "initial": c.limit.initial, "max": c.limit.max },
                })
            })
            .collect::<Vec<_>>(),
    })
}

fn live_rsp() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("live\n"))
        .expect("builder with known status code must not fail")
}

fn internal_error_rsp(error: impl ToString) -> Response<Body> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(error.to_string()))
        .expect("builder with known status code must not fail")
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .expect("builder with known status code must not fail")
}

fn method_not_allowed() -> Response<Body> {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .body(Body::empty())
        .expect("builder with known status code must not fail")
}

fn forbidden_not_localhost() -> Response<Body> {
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("requests are only permitted from localhost\n"))
        .expect("builder with known status code must not fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::watch;
    use tower::Service;
    use weft_metrics::Metrics;

    fn admin(ready: Readiness, enable_shutdown: bool) -> (Admin, mpsc::UnboundedReceiver<()>) {
        let mut registry = prometheus_client::registry::Registry::default();
        let _metrics = Metrics::register(&mut registry);
        let (tx, rx) = mpsc::unbounded_channel();
        let (_cfg_tx, cfg_rx) = watch::channel(Arc::new(snapshot("v1")));
        let admin = Admin::new(
            Serve::new(registry),
            cfg_rx,
            ready,
            Arc::new(|| ()),
            tx,
            enable_shutdown,
        );
        (admin, rx)
    }

    fn snapshot(version: &str) -> ConfigSnapshot {
        ConfigSnapshot {
            version: version.into(),
            listeners: Vec::new().into(),
            clusters: Default::default(),
        }
    }

    async fn call(
        admin: &Admin,
        client: &str,
        method: Method,
        path: &str,
    ) -> Response<Body> {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .expect("request");
        let mut handler = admin.handler(client.parse().expect("addr"));
        handler.call(req).await.expect("admin is infallible")
    }

    #[tokio::test]
    async fn readiness_is_probed() {
        let ready = Readiness::new(false);
        let (admin, _rx) = admin(ready.clone(), false);

        let rsp = call(&admin, "127.0.0.1:9", Method::GET, "/ready").await;
        assert_eq!(rsp.status(), StatusCode::SERVICE_UNAVAILABLE);

        ready.set(true);
        let rsp = call(&admin, "127.0.0.1:9", Method::GET, "/ready").await;
        assert_eq!(rsp.status(), StatusCode::OK);

        let rsp = call(&admin, "127.0.0.1:9", Method::GET, "/live").await;
        assert_eq!(rsp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn shutdown_is_gated() {
        let (admin, mut rx) = admin(Readiness::new(true), true);

        let rsp = call(&admin, "127.0.0.1:9", Method::GET, "/shutdown").await;
        assert_eq!(rsp.status(), StatusCode::METHOD_NOT_ALLOWED);

        let rsp = call(&admin, "10.0.0.8:9", Method::POST, "/shutdown").await;
        assert_eq!(rsp.status(), StatusCode::FORBIDDEN);

        let rsp = call(&admin, "127.0.0.1:9", Method::POST, "/shutdown").await;
        assert_eq!(rsp.status(), StatusCode::OK);
        rx.recv().await.expect("shutdown signaled");
    }

    #[tokio::test]
    async fn disabled_shutdown_is_absent() {
        let (admin, _rx) = admin(Readiness::new(true), false);
        let rsp = call(&admin, "127.0.0.1:9", Method::POST, "/shutdown").await;
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn gauges_refresh_before_a_scrape() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counted = refreshes.clone();

        let mut registry = prometheus_client::registry::Registry::default();
        let _metrics = Metrics::register(&mut registry);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_cfg_tx, cfg_rx) = watch::channel(Arc::new(snapshot("v1")));
        let admin = Admin::new(
            Serve::new(registry),
            cfg_rx,
            Readiness::new(true),
            Arc::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            tx,
            false,
        );

        let rsp = call(&admin, "127.0.0.1:9", Method::GET, "/metrics").await;
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(
            rsp.headers().get(header::CONTENT_TYPE).unwrap(),
            Serve::CONTENT_TYPE,
        );
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn config_dump_reports_the_live_snapshot() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = prometheus_client::registry::Registry::default();
        let _metrics = Metrics::register(&mut registry);
        let (cfg_tx, cfg_rx) = watch::channel(Arc::new(snapshot("v1")));
        let admin = Admin::new(
            Serve::new(registry),
            cfg_rx,
            Readiness::new(true),
            Arc::new(|| ()),
            tx,
            false,
        );

        let rsp = call(&admin, "127.0.0.1:9", Method::GET, "/config_dump").await;
        assert_eq!(rsp.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(rsp.into_body()).await.expect("body");
        assert!(String::from_utf8_lossy(&body).contains("v1"));

        cfg_tx.send_replace(Arc::new(snapshot("v2")));
        let rsp = call(&admin, "127.0.0.1:9", Method::GET, "/config_dump").await;
        let body = hyper::body::to_bytes(rsp.into_body()).await.expect("body");
        assert!(String::from_utf8_lossy(&body).contains("v2"));
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let (admin, _rx) = admin(Readiness::new(true), false);
        let rsp = call(&admin, "127.0.0.1:9", Method::GET, "/nope").await;
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    }
}
