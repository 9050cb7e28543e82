//! Request forwarding.
//!
//! A managed request holds one concurrency permit for its whole lifetime,
//! including retries, so the window tracks caller-visible load. Each attempt
//! picks its own endpoint and charges its own outcome to outlier accrual.
//! Synthesized failures use ordinary gateway statuses so callers never see a
//! mesh-specific failure mode.

use crate::handles::ClusterHandle;
use crate::Shared;
use http::{Request, Response, StatusCode};
use http_body::Body as _;
use hyper::Body;
use rand::distributions::{Distribution, WeightedIndex};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};
use weft_app_core::classify::{self, Class};
use weft_app_core::http::{rewrite_to, shed_response, synthesized};
use weft_app_core::transport::OrigDstAddr;
use weft_app_core::Error;
use weft_balance::Pick;
use weft_metrics::{HttpMetrics, ResponseLabels, RouteLabels};
use weft_policy::{ClusterName, RetryPolicy, Route, WeightedBackend};

#[derive(Debug)]
enum DispatchError {
    NoReadyEndpoints,
    Connect(hyper::Error),
    PerTryTimeout,
    RouteTimeout,
    Rewrite(Error),
}

/// Forwards a request through a cluster's adaptive stack.
pub(crate) async fn to_cluster(
    shared: &Shared,
    handle: Arc<ClusterHandle>,
    labels: RouteLabels,
    route: &Route,
    req: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();

    let Some(permit) = handle.limit().try_acquire() else {
        debug!("Shedding");
        shared.metrics.http.shed(&labels);
        return finish(&shared.metrics.http, labels, start, shed_response());
    };

    let (parts, body) = req.into_parts();
    // Only a complete-and-empty body can be replayed; anything else gets
    // exactly one attempt regardless of the route's retry policy.
    let retry = route
        .retry
        .filter(|_| body.size_hint().exact() == Some(0));

    let outcome = {
        let forward = forward(shared, &handle, &labels, retry, parts, body);
        match route.timeout {
            Some(timeout) => match time::timeout(timeout, forward).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(?timeout, "Route timeout elapsed");
                    Err(DispatchError::RouteTimeout)
                }
            },
            None => forward.await,
        }
    };

    let rsp = match outcome {
        Ok(rsp) => rsp,
        Err(error) => error.into_response(),
    };

    // Successful round trips feed the window's latency sample; everything
    // else just frees the slot.
    if classify::of_response(&rsp).is_success() {
        permit.complete();
    } else {
        drop(permit);
    }

    finish(&shared.metrics.http, labels, start, rsp)
}

async fn forward(
    shared: &Shared,
    handle: &ClusterHandle,
    labels: &RouteLabels,
    retry: Option<RetryPolicy>,
    parts: http::request::Parts,
    body: Body,
) -> Result<Response<Body>, DispatchError> {
    let attempts = retry.map(|r| r.max_attempts.max(1)).unwrap_or(1);
    let per_try = retry.and_then(|r| r.per_try_timeout);

    let mut body = Some(body);
    let mut attempt = 1;
    loop {
        let mut req = Request::new(body.take().unwrap_or_else(Body::empty));
        *req.method_mut() = parts.method.clone();
        *req.uri_mut() = parts.uri.clone();
        *req.version_mut() = parts.version;
        *req.headers_mut() = parts.headers.clone();

        let outcome = dispatch(shared, handle, &labels.cluster, per_try, req).await;
        let again = attempt < attempts
            && match &outcome {
                Ok(rsp) => retryable_status(rsp.status()),
                Err(error) => error.is_retryable(),
            };
        if !again {
            return outcome;
        }

        trace!(attempt, "Retrying");
        shared.metrics.http.retry(labels);
        attempt += 1;
    }
}

/// One attempt: pick an endpoint, send, classify, and charge the outcome.
async fn dispatch(
    shared: &Shared,
    handle: &ClusterHandle,
    cluster: &str,
    per_try: Option<Duration>,
    mut req: Request<Body>,
) -> Result<Response<Body>, DispatchError> {
    let Some(pick) = handle.select() else {
        debug!("No ready endpoints");
        return Err(DispatchError::NoReadyEndpoints);
    };
    if pick.spilled {
        shared.metrics.balance.spillover(cluster);
    }

    if let Err(error) = rewrite_to(&mut req, pick.addr) {
        warn!(%error, "Request target cannot be rewritten");
        return Err(DispatchError::Rewrite(error));
    }

    let call = shared.client.request(req);
    let outcome = match per_try {
        Some(timeout) => match time::timeout(timeout, call).await {
            Ok(result) => result.map_err(DispatchError::Connect),
            Err(_) => Err(DispatchError::PerTryTimeout),
        },
        None => call.await.map_err(DispatchError::Connect),
    };

    match &outcome {
        Ok(rsp) => record(shared, &pick, classify::of_response(rsp), cluster),
        Err(DispatchError::Connect(error)) => {
            debug!(%error, endpoint = %pick.addr, "Upstream request failed");
            record(shared, &pick, Class::Failure, cluster);
        }
        Err(DispatchError::PerTryTimeout) => {
            debug!(endpoint = %pick.addr, "Per-try timeout elapsed");
            record(shared, &pick, Class::Failure, cluster);
        }
        Err(_) => {}
    }
    outcome
}

/// Forwards a request to its original destination, untouched.
pub(crate) async fn passthrough(
    shared: &Shared,
    orig_dst: Option<OrigDstAddr>,
    mut req: Request<Body>,
) -> Response<Body> {
    let Some(OrigDstAddr(addr)) = orig_dst else {
        warn!("No original destination for unrouted request");
        return bad_gateway();
    };

    shared.metrics.http.passthrough();
    if let Err(error) = rewrite_to(&mut req, addr) {
        warn!(%error, "Request target cannot be rewritten");
        return bad_gateway();
    }
    match shared.client.request(req).await {
        Ok(rsp) => rsp,
        Err(error) => {
            debug!(%error, %addr, "Pass-through request failed");
            bad_gateway()
        }
    }
}

/// Resolves the cluster a request lands on: the canary override when its
/// header matches exactly, otherwise a weighted pick among the backends.
pub(crate) fn target_cluster<B>(route: &Route, req: &Request<B>) -> ClusterName {
    if let Some(ovr) = &route.header_override {
        if ovr.applies(req) {
            trace!(cluster = %ovr.cluster, "Header override");
            return ovr.cluster.clone();
        }
    }
    pick_backend(route).cluster.clone()
}

fn pick_backend(route: &Route) -> &WeightedBackend {
    if route.backends.len() == 1 {
        return &route.backends[0];
    }
    let dist = WeightedIndex::new(route.backends.iter().map(|b| b.weight))
        .expect("validated route has nonzero total weight");
    &route.backends[dist.sample(&mut rand::thread_rng())]
}

fn record(shared: &Shared, pick: &Pick, class: Class, cluster: &str) {
    let Some(outlier) = &pick.outlier else { return };
    match class {
        Class::Success => outlier.record_success(),
        Class::Failure => {
            if let Some(window) = outlier.record_failure() {
                warn!(endpoint = %pick.addr, ?window, "Ejecting endpoint");
                shared.metrics.balance.ejection(cluster);
            }
        }
        // Sheds never reached an endpoint; there is nothing to charge.
        Class::Shed => {}
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

fn retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

// === impl DispatchError ===

impl DispatchError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::PerTryTimeout)
    }

    fn into_response(self) -> Response<Body> {
        match self {
            Self::NoReadyEndpoints => unavailable(),
            Self::Connect(_) | Self::Rewrite(_) => bad_gateway(),
            Self::PerTryTimeout | Self::RouteTimeout => gateway_timeout(),
        }
    }
}

fn unavailable() -> Response<Body> {
    synthesized(StatusCode::SERVICE_UNAVAILABLE)
}

pub(crate) fn bad_gateway() -> Response<Body> {
    synthesized(StatusCode::BAD_GATEWAY)
}

fn gateway_timeout() -> Response<Body> {
    synthesized(StatusCode::GATEWAY_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderName, HeaderValue};

    fn route(backends: &[(&str, u32)], ovr: Option<weft_policy::HeaderOverride>) -> Route {
        Route {
            name: "test".into(),
            backends: backends
                .iter()
                .map(|(cluster, weight)| WeightedBackend {
                    cluster: (*cluster).into(),
                    weight: *weight,
                })
                .collect::<Vec<_>>()
                .into(),
            header_override: ovr,
            retry: None,
            timeout: None,
        }
    }

    #[test]
    fn weighted_pick_respects_zero_weights() {
        let route = route(&[("stable", 1), ("canary", 0)], None);
        let req = Request::builder().body(()).unwrap();
        for _ in 0..32 {
            assert_eq!(&*target_cluster(&route, &req), "stable");
        }
    }

    #[test]
    fn tagged_requests_always_reach_the_override_cluster() {
        // Even a zero-weight canary receives tagged traffic.
        let route = route(
            &[("stable", 100), ("canary", 0)],
            Some(weft_policy::HeaderOverride {
                header: HeaderName::from_static("x-canary"),
                value: HeaderValue::from_static("1"),
                cluster: "canary".into(),
            }),
        );

        let tagged = Request::builder().header("x-canary", "1").body(()).unwrap();
        for _ in 0..32 {
            assert_eq!(&*target_cluster(&route, &tagged), "canary");
        }

        let untagged = Request::builder().body(()).unwrap();
        for _ in 0..32 {
            assert_eq!(&*target_cluster(&route, &untagged), "stable");
        }

        let mistagged = Request::builder()
            .header("x-canary", "definitely")
            .body(())
            .unwrap();
        for _ in 0..32 {
            assert_eq!(&*target_cluster(&route, &mistagged), "stable");
        }
    }

    #[test]
    fn retryable_statuses_are_gateway_shaped() {
        assert!(retryable_status(StatusCode::BAD_GATEWAY));
        assert!(retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(retryable_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!retryable_status(StatusCode::OK));
    }
}
