use crate::ClusterName;
use http::{header::HeaderName, HeaderValue, Method};
use std::{sync::Arc, time::Duration};

/// A rule mapping matched requests onto a weighted set of backend clusters.
///
/// The match predicate lives alongside the route in the listener's ordered
/// list; evaluation is first-match-wins.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub name: Arc<str>,
    pub backends: Arc<[WeightedBackend]>,
    pub header_override: Option<HeaderOverride>,
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
}

/// Populated fields must all match; empty fields match anything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteMatch {
    pub authority: Option<String>,
    pub path_prefix: Option<String>,
    pub method: Option<Method>,
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightedBackend {
    pub cluster: ClusterName,
    pub weight: u32,
}

/// Pins tagged requests to one cluster, bypassing the weighted split.
///
/// The decision is a plain equality check on one header, so every request
/// falls on exactly one side of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderOverride {
    pub header: HeaderName,
    pub value: HeaderValue,
    pub cluster: ClusterName,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub per_try_timeout: Option<Duration>,
}

// === impl RouteMatch ===

impl RouteMatch {
    pub fn matches<B>(&self, req: &http::Request<B>) -> bool {
        if let Some(authority) = self.authority.as_deref() {
            if request_authority(req) != Some(authority) {
                return false;
            }
        }
        if let Some(prefix) = self.path_prefix.as_deref() {
            if !req.uri().path().starts_with(prefix) {
                return false;
            }
        }
        if let Some(method) = &self.method {
            if req.method() != method {
                return false;
            }
        }
        self.headers
            .iter()
            .all(|(name, value)| req.headers().get(name) == Some(value))
    }
}

/// The authority a request was addressed to: from the URI in absolute form,
/// otherwise from the `Host` header.
pub fn request_authority<B>(req: &http::Request<B>) -> Option<&str> {
    req.uri()
        .authority()
        .map(|a| a.as_str())
        .or_else(|| req.headers().get(http::header::HOST)?.to_str().ok())
}

// === impl HeaderOverride ===

impl HeaderOverride {
    pub fn applies<B>(&self, req: &http::Request<B>) -> bool {
        req.headers().get(&self.header) == Some(&self.value)
    }
}

// === impl Route ===

impl Route {
    /// Total weight across backends. Validation guarantees this is nonzero
    /// for any route that reaches a proxy.
    pub fn total_weight(&self) -> u64 {
        self.backends.iter().map(|b| u64::from(b.weight)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(uri: &str) -> http::Request<()> {
        http::Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn empty_match_matches_everything() {
        let m = RouteMatch::default();
        assert!(m.matches(&req("/anything")));
    }

    #[test]
    fn authority_from_uri_or_host_header() {
        let m = RouteMatch {
            authority: Some("billing.shop:8080".to_string()),
            ..RouteMatch::default()
        };
        assert!(m.matches(&req("http://billing.shop:8080/pay")));
        assert!(!m.matches(&req("http://other.shop:8080/pay")));

        let origin_form = http::Request::builder()
            .uri("/pay")
            .header(http::header::HOST, "billing.shop:8080")
            .body(())
            .unwrap();
        assert!(m.matches(&origin_form));
    }

    #[test]
    fn path_method_and_headers_must_all_match() {
        let m = RouteMatch {
            path_prefix: Some("/api/".to_string()),
            method: Some(Method::POST),
            headers: vec![(
                HeaderName::from_static("x-tenant"),
                HeaderValue::from_static("blue"),
            )],
            ..RouteMatch::default()
        };

        let hit = http::Request::builder()
            .method(Method::POST)
            .uri("/api/orders")
            .header("x-tenant", "blue")
            .body(())
            .unwrap();
        assert!(m.matches(&hit));

        let wrong_method = http::Request::builder()
            .method(Method::GET)
            .uri("/api/orders")
            .header("x-tenant", "blue")
            .body(())
            .unwrap();
        assert!(!m.matches(&wrong_method));

        let wrong_header = http::Request::builder()
            .method(Method::POST)
            .uri("/api/orders")
            .header("x-tenant", "green")
            .body(())
            .unwrap();
        assert!(!m.matches(&wrong_header));
    }

    #[test]
    fn override_decision_is_total() {
        let ovr = HeaderOverride {
            header: HeaderName::from_static("x-canary"),
            value: HeaderValue::from_static("1"),
            cluster: "billing-canary".into(),
        };

        let tagged = http::Request::builder()
            .uri("/pay")
            .header("x-canary", "1")
            .body(())
            .unwrap();
        let mistagged = http::Request::builder()
            .uri("/pay")
            .header("x-canary", "yes")
            .body(())
            .unwrap();
        let untagged = req("/pay");

        assert!(ovr.applies(&tagged));
        assert!(!ovr.applies(&mistagged));
        assert!(!ovr.applies(&untagged));
    }
}
