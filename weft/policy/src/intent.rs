//! The operator-authored intent document.
//!
//! Intent is the reviewable input to configuration: one YAML document per
//! workload declaring its listeners, routes, and dependency clusters. The
//! controller validates intent before computing anything from it; malformed
//! intent is rejected at compute time and never delivered to a proxy.

use crate::proto;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use weft_api::discovery::v1 as pb;
use weft_api::registry::v1 as pb_registry;

pub const DEFAULT_OUTBOUND_PORT: u16 = 15001;
pub const DEFAULT_INBOUND_PORT: u16 = 15006;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Intent {
    /// Workload identity, e.g. `shop/billing`.
    pub workload: String,
    #[serde(default)]
    pub listeners: Vec<ListenerSpec>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerSpec {
    pub name: String,
    pub kind: KindSpec,
    pub port: u16,
    /// Route names evaluated in order; first match wins.
    #[serde(default)]
    pub routes: Vec<String>,
    /// For inbound listeners: the local port the workload itself listens on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_port: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KindSpec {
    Inbound,
    Outbound,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RouteSpec {
    pub name: String,
    #[serde(default)]
    pub r#match: MatchSpec,
    pub backends: Vec<BackendSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_override: Option<HeaderOverrideSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MatchSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSpec {
    pub cluster: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderOverrideSpec {
    pub header: String,
    pub value: String,
    pub cluster: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySpec {
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_try_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSpec {
    pub name: String,
    /// Fixed endpoint list; mutually exclusive with `registry`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#static: Option<Vec<EndpointSpec>>,
    /// Registry service name; mutually exclusive with `static`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balancer: Option<BalancerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier: Option<OutlierSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<LimitSpec>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    /// Socket address in `ip:port` form.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerSpec {
    RoundRobin,
    ZoneAware { min_zone_ratio: f64 },
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutlierSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_failures: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ejection_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ejection_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LimitSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidIntent {
    #[error("failed to parse intent: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("workload name is empty")]
    EmptyWorkload,

    #[error("duplicate {kind} name `{name}`")]
    Duplicate { kind: &'static str, name: String },

    #[error("listeners `{0}` and `{1}` both bind port {2}")]
    DuplicatePort(String, String, u16),

    #[error("listener `{0}` port must be nonzero")]
    InvalidPort(String),

    #[error("inbound listener `{0}` must declare app_port")]
    MissingAppPort(String),

    #[error("outbound listener `{0}` must not declare app_port")]
    UnexpectedAppPort(String),

    #[error("listener `{0}` references unknown route `{1}`")]
    UnknownRoute(String, String),

    #[error("route `{0}` references unknown cluster `{1}`")]
    UnknownCluster(String, String),

    #[error("route `{0}` has no backends")]
    NoBackends(String),

    #[error("route `{0}` has zero total backend weight")]
    ZeroWeight(String),

    #[error("route `{0}` has an invalid header: {1}")]
    InvalidHeader(String, http::Error),

    #[error("route `{0}` has an invalid method `{1}`")]
    InvalidMethod(String, String),

    #[error("route `{0}` path prefix must begin with `/`")]
    InvalidPathPrefix(String),

    #[error("route `{0}` retry max_attempts must be at least 1")]
    InvalidRetry(String),

    #[error("cluster `{0}` must declare exactly one of `static` or `registry`")]
    AmbiguousDiscovery(String),

    #[error("cluster `{0}` has an empty static endpoint list")]
    NoStaticEndpoints(String),

    #[error("cluster `{0}` endpoint `{1}` is not a socket address")]
    InvalidAddress(String, String),

    #[error("cluster `{0}` min_zone_ratio {1} is outside [0, 1]")]
    InvalidZoneRatio(String, f64),

    #[error("cluster `{0}` outlier base_ejection_ms exceeds max_ejection_ms")]
    InvalidEjection(String),

    #[error("cluster `{0}` outlier consecutive_failures must be at least 1")]
    InvalidEjectionThreshold(String),

    #[error("cluster `{0}` limit bounds must satisfy 1 <= min <= initial <= max")]
    InvalidLimitBounds(String),

    #[error("cluster `{0}` limit tolerance must be at least 1.0")]
    InvalidTolerance(String),
}

// === impl Intent ===

impl Intent {
    /// Parses and validates one intent document.
    pub fn from_yaml(doc: &str) -> Result<Self, InvalidIntent> {
        let intent: Self = serde_yaml::from_str(doc)?;
        intent.validate()?;
        Ok(intent)
    }

    /// The baseline intent the injector falls back to when a workload
    /// declares nothing: intercept both directions, route nothing, so all
    /// outbound traffic passes through to its original destination.
    pub fn passthrough(workload: impl Into<String>, app_port: u16) -> Self {
        Self {
            workload: workload.into(),
            listeners: vec![
                ListenerSpec {
                    name: "outbound".to_string(),
                    kind: KindSpec::Outbound,
                    port: DEFAULT_OUTBOUND_PORT,
                    routes: vec![],
                    app_port: None,
                },
                ListenerSpec {
                    name: "inbound".to_string(),
                    kind: KindSpec::Inbound,
                    port: DEFAULT_INBOUND_PORT,
                    routes: vec![],
                    app_port: Some(app_port),
                },
            ],
            routes: vec![],
            clusters: vec![],
        }
    }

    pub fn validate(&self) -> Result<(), InvalidIntent> {
        if self.workload.is_empty() {
            return Err(InvalidIntent::EmptyWorkload);
        }

        let mut cluster_names = HashSet::new();
        for c in &self.clusters {
            if !cluster_names.insert(c.name.as_str()) {
                return Err(InvalidIntent::Duplicate {
                    kind: "cluster",
                    name: c.name.clone(),
                });
            }
            c.validate()?;
        }

        let mut route_names = HashSet::new();
        for r in &self.routes {
            if !route_names.insert(r.name.as_str()) {
                return Err(InvalidIntent::Duplicate {
                    kind: "route",
                    name: r.name.clone(),
                });
            }
            r.validate(&cluster_names)?;
        }

        let mut listener_names = HashSet::new();
        let mut ports: BTreeMap<u16, &str> = BTreeMap::new();
        for l in &self.listeners {
            if !listener_names.insert(l.name.as_str()) {
                return Err(InvalidIntent::Duplicate {
                    kind: "listener",
                    name: l.name.clone(),
                });
            }
            if l.port == 0 {
                return Err(InvalidIntent::InvalidPort(l.name.clone()));
            }
            if let Some(other) = ports.insert(l.port, &l.name) {
                return Err(InvalidIntent::DuplicatePort(
                    other.to_string(),
                    l.name.clone(),
                    l.port,
                ));
            }
            match l.kind {
                KindSpec::Inbound if l.app_port.is_none() => {
                    return Err(InvalidIntent::MissingAppPort(l.name.clone()));
                }
                KindSpec::Outbound if l.app_port.is_some() => {
                    return Err(InvalidIntent::UnexpectedAppPort(l.name.clone()));
                }
                _ => {}
            }
            for r in &l.routes {
                if !route_names.contains(r.as_str()) {
                    return Err(InvalidIntent::UnknownRoute(l.name.clone(), r.clone()));
                }
            }
        }

        Ok(())
    }

    /// Computes the wire bundle for this intent.
    ///
    /// The computation is pure: the same intent always yields the same
    /// bundle, including its content-hash version, so any controller replica
    /// can recompute it independently. Inbound listeners are expanded here
    /// into a synthesized local cluster and catch-all route targeting the
    /// workload's own port.
    pub fn to_bundle(&self) -> Result<pb::ConfigBundle, InvalidIntent> {
        self.validate()?;

        let mut listeners = Vec::with_capacity(self.listeners.len());
        let mut routes: Vec<pb::Route> = self.routes.iter().map(RouteSpec::to_proto).collect();
        let mut clusters: Vec<pb::Cluster> = self
            .clusters
            .iter()
            .map(|c| c.to_proto())
            .collect::<Result<_, _>>()?;

        for l in &self.listeners {
            let mut route_names = l.routes.clone();
            if let (KindSpec::Inbound, Some(app_port)) = (l.kind, l.app_port) {
                let local_cluster = format!("{}-local", l.name);
                let local_route = format!("{}-default", l.name);
                clusters.push(pb::Cluster {
                    name: local_cluster.clone(),
                    balancer: Some(pb::Balancer {
                        kind: Some(pb::balancer::Kind::RoundRobin(pb::RoundRobin {})),
                    }),
                    // Ejecting the workload's only endpoint would blackhole
                    // it, so the local cluster carries no outlier policy.
                    outlier: None,
                    limit: Some(LimitSpec::default().to_proto()),
                    discovery: Some(pb::cluster::Discovery::StaticEndpoints(
                        pb::StaticEndpoints {
                            endpoints: vec![pb_registry::Endpoint {
                                address: format!("127.0.0.1:{}", app_port),
                                zone: String::new(),
                                weight: 1,
                                health: pb_registry::Health::Healthy as i32,
                            }],
                        },
                    )),
                });
                routes.push(pb::Route {
                    name: local_route.clone(),
                    r#match: None,
                    backends: vec![pb::WeightedBackend {
                        cluster: local_cluster,
                        weight: 1,
                    }],
                    header_override: None,
                    retry: None,
                    timeout_ms: 0,
                });
                route_names.push(local_route);
            }
            listeners.push(pb::Listener {
                name: l.name.clone(),
                kind: match l.kind {
                    KindSpec::Inbound => pb::listener::Kind::Inbound,
                    KindSpec::Outbound => pb::listener::Kind::Outbound,
                } as i32,
                port: u32::from(l.port),
                routes: route_names,
            });
        }

        let mut bundle = pb::ConfigBundle {
            version: String::new(),
            listeners,
            routes,
            clusters,
        };
        bundle.version = proto::version_of(&bundle);
        Ok(bundle)
    }
}

// === impl RouteSpec ===

impl RouteSpec {
    fn validate(&self, clusters: &HashSet<&str>) -> Result<(), InvalidIntent> {
        if self.backends.is_empty() {
            return Err(InvalidIntent::NoBackends(self.name.clone()));
        }
        if self.backends.iter().map(|b| u64::from(b.weight)).sum::<u64>() == 0 {
            return Err(InvalidIntent::ZeroWeight(self.name.clone()));
        }
        for b in &self.backends {
            if !clusters.contains(b.cluster.as_str()) {
                return Err(InvalidIntent::UnknownCluster(
                    self.name.clone(),
                    b.cluster.clone(),
                ));
            }
        }

        if let Some(prefix) = self.r#match.path_prefix.as_deref() {
            if !prefix.starts_with('/') {
                return Err(InvalidIntent::InvalidPathPrefix(self.name.clone()));
            }
        }
        if let Some(method) = self.r#match.method.as_deref() {
            http::Method::from_bytes(method.as_bytes())
                .map_err(|_| InvalidIntent::InvalidMethod(self.name.clone(), method.to_string()))?;
        }
        for (name, value) in &self.r#match.headers {
            check_header(&self.name, name, value)?;
        }

        if let Some(ovr) = &self.header_override {
            check_header(&self.name, &ovr.header, &ovr.value)?;
            if !clusters.contains(ovr.cluster.as_str()) {
                return Err(InvalidIntent::UnknownCluster(
                    self.name.clone(),
                    ovr.cluster.clone(),
                ));
            }
        }

        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err(InvalidIntent::InvalidRetry(self.name.clone()));
            }
        }

        Ok(())
    }

    fn to_proto(&self) -> pb::Route {
        pb::Route {
            name: self.name.clone(),
            r#match: Some(pb::RouteMatch {
                authority: self.r#match.authority.clone().unwrap_or_default(),
                path_prefix: self.r#match.path_prefix.clone().unwrap_or_default(),
                method: self.r#match.method.clone().unwrap_or_default(),
                headers: self
                    .r#match
                    .headers
                    .iter()
                    .map(|(name, value)| pb::HeaderMatch {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            }),
            backends: self
                .backends
                .iter()
                .map(|b| pb::WeightedBackend {
                    cluster: b.cluster.clone(),
                    weight: b.weight,
                })
                .collect(),
            header_override: self.header_override.as_ref().map(|o| pb::HeaderOverride {
                header: o.header.clone(),
                value: o.value.clone(),
                cluster: o.cluster.clone(),
            }),
            retry: self.retry.as_ref().map(|r| pb::RetryPolicy {
                max_attempts: r.max_attempts,
                per_try_timeout_ms: r.per_try_timeout_ms.unwrap_or_default(),
            }),
            timeout_ms: self.timeout_ms.unwrap_or_default(),
        }
    }
}

fn check_header(route: &str, name: &str, value: &str) -> Result<(), InvalidIntent> {
    http::header::HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| InvalidIntent::InvalidHeader(route.to_string(), e.into()))?;
    http::HeaderValue::from_str(value)
        .map_err(|e| InvalidIntent::InvalidHeader(route.to_string(), e.into()))?;
    Ok(())
}

// === impl ClusterSpec ===

impl ClusterSpec {
    fn validate(&self) -> Result<(), InvalidIntent> {
        match (&self.r#static, &self.registry) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(InvalidIntent::AmbiguousDiscovery(self.name.clone()));
            }
            (Some(endpoints), None) => {
                if endpoints.is_empty() {
                    return Err(InvalidIntent::NoStaticEndpoints(self.name.clone()));
                }
                for ep in endpoints {
                    if ep.address.parse::<std::net::SocketAddr>().is_err() {
                        return Err(InvalidIntent::InvalidAddress(
                            self.name.clone(),
                            ep.address.clone(),
                        ));
                    }
                }
            }
            (None, Some(_)) => {}
        }

        if let Some(BalancerSpec::ZoneAware { min_zone_ratio }) = self.balancer {
            if !(0.0..=1.0).contains(&min_zone_ratio) {
                return Err(InvalidIntent::InvalidZoneRatio(
                    self.name.clone(),
                    min_zone_ratio,
                ));
            }
        }

        if let Some(outlier) = &self.outlier {
            let resolved = outlier.resolve();
            if resolved.consecutive_failures == 0 {
                return Err(InvalidIntent::InvalidEjectionThreshold(self.name.clone()));
            }
            if resolved.base_ejection_ms > resolved.max_ejection_ms {
                return Err(InvalidIntent::InvalidEjection(self.name.clone()));
            }
        }

        if let Some(limit) = &self.limit {
            let resolved = limit.resolve();
            if resolved.min == 0
                || resolved.min > resolved.initial
                || resolved.initial > resolved.max
            {
                return Err(InvalidIntent::InvalidLimitBounds(self.name.clone()));
            }
            if resolved.tolerance < 1.0 {
                return Err(InvalidIntent::InvalidTolerance(self.name.clone()));
            }
        }

        Ok(())
    }

    fn to_proto(&self) -> Result<pb::Cluster, InvalidIntent> {
        let discovery = match (&self.r#static, &self.registry) {
            (Some(endpoints), None) => {
                let mut eps = Vec::with_capacity(endpoints.len());
                for ep in endpoints {
                    ep.address.parse::<std::net::SocketAddr>().map_err(|_| {
                        InvalidIntent::InvalidAddress(self.name.clone(), ep.address.clone())
                    })?;
                    eps.push(pb_registry::Endpoint {
                        address: ep.address.clone(),
                        zone: ep.zone.clone().unwrap_or_default(),
                        weight: ep.weight,
                        health: pb_registry::Health::Healthy as i32,
                    });
                }
                pb::cluster::Discovery::StaticEndpoints(pb::StaticEndpoints { endpoints: eps })
            }
            (None, Some(service)) => pb::cluster::Discovery::Registry(pb::RegistryDiscovery {
                service: service.clone(),
            }),
            _ => return Err(InvalidIntent::AmbiguousDiscovery(self.name.clone())),
        };

        let balancer = match self.balancer.clone().unwrap_or(BalancerSpec::RoundRobin) {
            BalancerSpec::RoundRobin => pb::Balancer {
                kind: Some(pb::balancer::Kind::RoundRobin(pb::RoundRobin {})),
            },
            BalancerSpec::ZoneAware { min_zone_ratio } => pb::Balancer {
                kind: Some(pb::balancer::Kind::ZoneAware(pb::ZoneAware {
                    min_zone_ratio,
                })),
            },
        };

        Ok(pb::Cluster {
            name: self.name.clone(),
            balancer: Some(balancer),
            outlier: Some(self.outlier.clone().unwrap_or_default().resolve()),
            limit: Some(self.limit.clone().unwrap_or_default().to_proto()),
            discovery: Some(discovery),
        })
    }
}

// === impl OutlierSpec ===

impl OutlierSpec {
    fn resolve(&self) -> pb::OutlierPolicy {
        let default = crate::OutlierPolicy::default();
        pb::OutlierPolicy {
            consecutive_failures: self
                .consecutive_failures
                .unwrap_or(default.consecutive_failures),
            base_ejection_ms: self
                .base_ejection_ms
                .unwrap_or(default.base_ejection.as_millis() as u64),
            max_ejection_ms: self
                .max_ejection_ms
                .unwrap_or(default.max_ejection.as_millis() as u64),
        }
    }
}

// === impl LimitSpec ===

impl LimitSpec {
    fn resolve(&self) -> pb::LimitPolicy {
        self.to_proto()
    }

    fn to_proto(&self) -> pb::LimitPolicy {
        let default = crate::LimitPolicy::default();
        pb::LimitPolicy {
            initial: self.initial.unwrap_or(default.initial),
            min: self.min.unwrap_or(default.min),
            max: self.max.unwrap_or(default.max),
            tolerance: self.tolerance.unwrap_or(default.tolerance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
workload: shop/billing
listeners:
  - name: egress
    kind: outbound
    port: 15001
    routes: [to-payments]
  - name: ingress
    kind: inbound
    port: 15006
    app_port: 8080
routes:
  - name: to-payments
    match:
      authority: payments.shop:8080
    backends:
      - cluster: payments
        weight: 90
      - cluster: payments-canary
        weight: 10
    header_override:
      header: x-canary
      value: "1"
      cluster: payments-canary
clusters:
  - name: payments
    registry: payments.shop
    balancer:
      zone_aware:
        min_zone_ratio: 0.3
  - name: payments-canary
    registry: payments-canary.shop
"#;

    #[test]
    fn parses_and_validates() {
        let intent = Intent::from_yaml(DOC).expect("must parse");
        assert_eq!(intent.workload, "shop/billing");
        assert_eq!(intent.listeners.len(), 2);
        assert_eq!(intent.clusters.len(), 2);
    }

    #[test]
    fn rejects_unknown_backend_cluster() {
        let doc = DOC.replace(
            "cluster: payments\n        weight: 90",
            "cluster: nope\n        weight: 90",
        );
        match Intent::from_yaml(&doc) {
            Err(InvalidIntent::UnknownCluster(route, cluster)) => {
                assert_eq!(route, "to-payments");
                assert_eq!(cluster, "nope");
            }
            other => panic!("expected UnknownCluster, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_zero_weight_split() {
        let doc = DOC
            .replace("weight: 90", "weight: 0")
            .replace("weight: 10", "weight: 0");
        assert!(matches!(
            Intent::from_yaml(&doc),
            Err(InvalidIntent::ZeroWeight(_))
        ));
    }

    #[test]
    fn rejects_empty_static_endpoints() {
        let doc = r#"
workload: shop/billing
clusters:
  - name: ledger
    static: []
"#;
        assert!(matches!(
            Intent::from_yaml(doc),
            Err(InvalidIntent::NoStaticEndpoints(_))
        ));
    }

    #[test]
    fn rejects_bad_header_name() {
        let doc = DOC.replace("header: x-canary", "header: \"bad header\"");
        assert!(matches!(
            Intent::from_yaml(&doc),
            Err(InvalidIntent::InvalidHeader(..))
        ));
    }

    #[test]
    fn rejects_inbound_without_app_port() {
        let doc = DOC.replace("    app_port: 8080\n", "");
        assert!(matches!(
            Intent::from_yaml(&doc),
            Err(InvalidIntent::MissingAppPort(_))
        ));
    }

    #[test]
    fn bundle_is_deterministic() {
        let intent = Intent::from_yaml(DOC).expect("must parse");
        let a = intent.to_bundle().expect("bundle");
        let b = intent.to_bundle().expect("bundle");
        assert_eq!(a.version, b.version);
        assert!(!a.version.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn bundle_version_tracks_content() {
        let intent = Intent::from_yaml(DOC).expect("must parse");
        let a = intent.to_bundle().expect("bundle");

        let shifted = DOC
            .replace("weight: 90", "weight: 80")
            .replace("weight: 10", "weight: 20");
        let b = Intent::from_yaml(&shifted)
            .expect("must parse")
            .to_bundle()
            .expect("bundle");
        assert_ne!(a.version, b.version);
    }

    #[test]
    fn inbound_listener_synthesizes_local_cluster() {
        let intent = Intent::from_yaml(DOC).expect("must parse");
        let bundle = intent.to_bundle().expect("bundle");

        let local = bundle
            .clusters
            .iter()
            .find(|c| c.name == "ingress-local")
            .expect("local cluster");
        assert!(local.outlier.is_none());
        match &local.discovery {
            Some(pb::cluster::Discovery::StaticEndpoints(eps)) => {
                assert_eq!(eps.endpoints.len(), 1);
                assert_eq!(eps.endpoints[0].address, "127.0.0.1:8080");
            }
            other => panic!("unexpected discovery: {:?}", other),
        }

        let ingress = bundle
            .listeners
            .iter()
            .find(|l| l.name == "ingress")
            .expect("ingress listener");
        assert_eq!(ingress.routes, vec!["ingress-default".to_string()]);
    }

    #[test]
    fn passthrough_intent_validates() {
        let intent = Intent::passthrough("shop/billing", 8080);
        intent.validate().expect("valid");
        let bundle = intent.to_bundle().expect("bundle");
        assert_eq!(bundle.listeners.len(), 2);
        // The outbound listener routes nothing; everything passes through.
        let outbound = bundle
            .listeners
            .iter()
            .find(|l| l.name == "outbound")
            .expect("outbound listener");
        assert!(outbound.routes.is_empty());
    }
}
