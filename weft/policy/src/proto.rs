//! Conversions between the wire types and the domain model.
//!
//! Bundle conversion is strict: a bundle that does not convert is rejected
//! whole and the proxy keeps its last good snapshot. Endpoint conversion is
//! lenient: registries are eventually consistent, so unparseable entries are
//! dropped rather than poisoning the set.

use crate::{
    Balancer, Cluster, ConfigSnapshot, Discovery, Endpoint, Health, HeaderOverride, LimitPolicy,
    Listener, ListenerKind, OutlierPolicy, RetryPolicy, Route, RouteMatch, WeightedBackend,
};
use prost::Message;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use weft_api::discovery::v1 as pb;
use weft_api::registry::v1 as pb_registry;

#[derive(Debug, thiserror::Error)]
pub enum InvalidConfig {
    #[error("{0} name is empty")]
    EmptyName(&'static str),

    #[error("listener `{0}` has invalid port {1}")]
    InvalidPort(String, u32),

    #[error("listener `{0}` kind is unspecified")]
    UnspecifiedKind(String),

    #[error("listener `{0}` references unknown route `{1}`")]
    UnknownRoute(String, String),

    #[error("route `{0}` references unknown cluster `{1}`")]
    UnknownCluster(String, String),

    #[error("route `{0}` has no backends")]
    NoBackends(String),

    #[error("route `{0}` has zero total backend weight")]
    ZeroWeight(String),

    #[error("route `{0}` has an invalid method `{1}`")]
    InvalidMethod(String, String),

    #[error("route `{0}` has an invalid header")]
    InvalidHeader(String),

    #[error("route `{0}` path prefix must begin with `/`")]
    InvalidPathPrefix(String),

    #[error("route `{0}` retry max_attempts must be at least 1")]
    InvalidRetry(String),

    #[error("cluster `{0}` has no discovery mode")]
    MissingDiscovery(String),

    #[error("cluster `{0}` min_zone_ratio {1} is outside [0, 1]")]
    InvalidZoneRatio(String, f64),

    #[error("cluster `{0}` has an invalid outlier policy")]
    InvalidOutlier(String),

    #[error("cluster `{0}` limit bounds must satisfy 1 <= min <= initial <= max")]
    InvalidLimitBounds(String),

    #[error("cluster `{0}` limit tolerance must be at least 1.0")]
    InvalidTolerance(String),

    #[error("invalid endpoint address `{0}`")]
    InvalidAddress(String),
}

/// The content version of a bundle: hex SHA-256 over its wire encoding with
/// the version field cleared. Any two controllers computing the same bundle
/// content arrive at the same version.
pub fn version_of(bundle: &pb::ConfigBundle) -> String {
    let mut unversioned = bundle.clone();
    unversioned.version.clear();
    hex(&Sha256::digest(unversioned.encode_to_vec()))
}

fn hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[usize::from(b >> 4)] as char);
        out.push(DIGITS[usize::from(b & 0xf)] as char);
    }
    out
}

// === Endpoint conversions ===

pub fn endpoint_from_proto(ep: &pb_registry::Endpoint) -> Result<Endpoint, InvalidConfig> {
    let addr = ep
        .address
        .parse::<SocketAddr>()
        .map_err(|_| InvalidConfig::InvalidAddress(ep.address.clone()))?;
    Ok(Endpoint {
        addr,
        zone: if ep.zone.is_empty() {
            None
        } else {
            Some(ep.zone.as_str().into())
        },
        weight: ep.weight,
        health: match ep.health() {
            pb_registry::Health::Unhealthy => Health::Unhealthy,
            pb_registry::Health::Draining => Health::Draining,
            // A registry that has not reported health yet must not cost us
            // capacity; unknown is treated as healthy and corrected by
            // outlier tracking if that turns out to be wrong.
            pb_registry::Health::Healthy | pb_registry::Health::Unknown => Health::Healthy,
        },
    })
}

/// Converts a membership set, dropping unparseable entries. Returns the
/// endpoints and the number dropped.
pub fn endpoints_from_proto(set: &pb_registry::EndpointSet) -> (Vec<Endpoint>, usize) {
    let mut endpoints = Vec::with_capacity(set.endpoints.len());
    let mut dropped = 0;
    for ep in &set.endpoints {
        match endpoint_from_proto(ep) {
            Ok(ep) => endpoints.push(ep),
            Err(_) => dropped += 1,
        }
    }
    (endpoints, dropped)
}

pub fn endpoint_to_proto(ep: &Endpoint) -> pb_registry::Endpoint {
    pb_registry::Endpoint {
        address: ep.addr.to_string(),
        zone: ep.zone.as_deref().unwrap_or_default().to_string(),
        weight: ep.weight,
        health: match ep.health {
            Health::Healthy => pb_registry::Health::Healthy,
            Health::Unhealthy => pb_registry::Health::Unhealthy,
            Health::Draining => pb_registry::Health::Draining,
        } as i32,
    }
}

// === Bundle conversion ===

impl TryFrom<pb::ConfigBundle> for ConfigSnapshot {
    type Error = InvalidConfig;

    fn try_from(bundle: pb::ConfigBundle) -> Result<Self, Self::Error> {
        let mut clusters = HashMap::with_capacity(bundle.clusters.len());
        for c in bundle.clusters {
            let cluster = convert_cluster(c)?;
            clusters.insert(cluster.name.clone(), Arc::new(cluster));
        }

        let mut routes = HashMap::with_capacity(bundle.routes.len());
        for r in bundle.routes {
            let name = r.name.clone();
            let route = convert_route(r, &clusters)?;
            routes.insert(name, route);
        }

        let mut listeners = Vec::with_capacity(bundle.listeners.len());
        for l in bundle.listeners {
            listeners.push(convert_listener(l, &routes)?);
        }

        Ok(Self {
            version: bundle.version.into(),
            listeners: listeners.into(),
            clusters: Arc::new(clusters),
        })
    }
}

fn convert_cluster(c: pb::Cluster) -> Result<Cluster, InvalidConfig> {
    if c.name.is_empty() {
        return Err(InvalidConfig::EmptyName("cluster"));
    }
    let name: Arc<str> = c.name.as_str().into();

    let discovery = match c.discovery {
        Some(pb::cluster::Discovery::StaticEndpoints(eps)) => {
            let mut endpoints = Vec::with_capacity(eps.endpoints.len());
            for ep in &eps.endpoints {
                endpoints.push(endpoint_from_proto(ep)?);
            }
            Discovery::Static(endpoints.into())
        }
        Some(pb::cluster::Discovery::Registry(r)) if !r.service.is_empty() => {
            Discovery::Registry {
                service: r.service.as_str().into(),
            }
        }
        _ => return Err(InvalidConfig::MissingDiscovery(c.name)),
    };

    let balancer = match c.balancer.and_then(|b| b.kind) {
        None | Some(pb::balancer::Kind::RoundRobin(_)) => Balancer::RoundRobin,
        Some(pb::balancer::Kind::ZoneAware(z)) => {
            if !(0.0..=1.0).contains(&z.min_zone_ratio) {
                return Err(InvalidConfig::InvalidZoneRatio(c.name, z.min_zone_ratio));
            }
            Balancer::ZoneAware {
                min_zone_ratio: z.min_zone_ratio,
            }
        }
    };

    let outlier = match c.outlier {
        None => None,
        Some(o) => {
            if o.consecutive_failures == 0 || o.base_ejection_ms > o.max_ejection_ms {
                return Err(InvalidConfig::InvalidOutlier(c.name));
            }
            Some(OutlierPolicy {
                consecutive_failures: o.consecutive_failures,
                base_ejection: Duration::from_millis(o.base_ejection_ms),
                max_ejection: Duration::from_millis(o.max_ejection_ms),
            })
        }
    };

    let limit = match c.limit {
        None => LimitPolicy::default(),
        Some(l) => {
            if l.min == 0 || l.min > l.initial || l.initial > l.max {
                return Err(InvalidConfig::InvalidLimitBounds(c.name));
            }
            if l.tolerance < 1.0 {
                return Err(InvalidConfig::InvalidTolerance(c.name));
            }
            LimitPolicy {
                initial: l.initial,
                min: l.min,
                max: l.max,
                tolerance: l.tolerance,
            }
        }
    };

    Ok(Cluster {
        name,
        discovery,
        balancer,
        outlier,
        limit,
    })
}

fn convert_route(
    r: pb::Route,
    clusters: &HashMap<Arc<str>, Arc<Cluster>>,
) -> Result<(RouteMatch, Route), InvalidConfig> {
    if r.name.is_empty() {
        return Err(InvalidConfig::EmptyName("route"));
    }
    let name: Arc<str> = r.name.as_str().into();

    let m = r.r#match.unwrap_or_default();
    let method = if m.method.is_empty() {
        None
    } else {
        Some(
            http::Method::from_bytes(m.method.as_bytes())
                .map_err(|_| InvalidConfig::InvalidMethod(r.name.clone(), m.method.clone()))?,
        )
    };
    let path_prefix = if m.path_prefix.is_empty() {
        None
    } else if m.path_prefix.starts_with('/') {
        Some(m.path_prefix)
    } else {
        return Err(InvalidConfig::InvalidPathPrefix(r.name));
    };
    let mut headers = Vec::with_capacity(m.headers.len());
    for h in m.headers {
        let header_name = http::header::HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| InvalidConfig::InvalidHeader(r.name.clone()))?;
        let value = http::HeaderValue::from_str(&h.value)
            .map_err(|_| InvalidConfig::InvalidHeader(r.name.clone()))?;
        headers.push((header_name, value));
    }
    let matches = RouteMatch {
        authority: if m.authority.is_empty() {
            None
        } else {
            Some(m.authority)
        },
        path_prefix,
        method,
        headers,
    };

    if r.backends.is_empty() {
        return Err(InvalidConfig::NoBackends(r.name));
    }
    let mut total = 0u64;
    let mut backends = Vec::with_capacity(r.backends.len());
    for b in r.backends {
        if !clusters.contains_key(b.cluster.as_str()) {
            return Err(InvalidConfig::UnknownCluster(r.name, b.cluster));
        }
        total += u64::from(b.weight);
        backends.push(WeightedBackend {
            cluster: b.cluster.as_str().into(),
            weight: b.weight,
        });
    }
    if total == 0 {
        return Err(InvalidConfig::ZeroWeight(r.name));
    }

    let header_override = match r.header_override {
        None => None,
        Some(o) => {
            if !clusters.contains_key(o.cluster.as_str()) {
                return Err(InvalidConfig::UnknownCluster(r.name, o.cluster));
            }
            let header = http::header::HeaderName::from_bytes(o.header.as_bytes())
                .map_err(|_| InvalidConfig::InvalidHeader(r.name.clone()))?;
            let value = http::HeaderValue::from_str(&o.value)
                .map_err(|_| InvalidConfig::InvalidHeader(r.name.clone()))?;
            Some(HeaderOverride {
                header,
                value,
                cluster: o.cluster.as_str().into(),
            })
        }
    };

    let retry = match r.retry {
        None => None,
        Some(p) if p.max_attempts == 0 => return Err(InvalidConfig::InvalidRetry(r.name)),
        Some(p) => Some(RetryPolicy {
            max_attempts: p.max_attempts,
            per_try_timeout: (p.per_try_timeout_ms > 0)
                .then(|| Duration::from_millis(p.per_try_timeout_ms)),
        }),
    };

    let timeout = (r.timeout_ms > 0).then(|| Duration::from_millis(r.timeout_ms));

    Ok((
        matches,
        Route {
            name,
            backends: backends.into(),
            header_override,
            retry,
            timeout,
        },
    ))
}

fn convert_listener(
    l: pb::Listener,
    routes: &HashMap<String, (RouteMatch, Route)>,
) -> Result<Listener, InvalidConfig> {
    if l.name.is_empty() {
        return Err(InvalidConfig::EmptyName("listener"));
    }
    let kind = match l.kind() {
        pb::listener::Kind::Inbound => ListenerKind::Inbound,
        pb::listener::Kind::Outbound => ListenerKind::Outbound,
        pb::listener::Kind::Unspecified => {
            return Err(InvalidConfig::UnspecifiedKind(l.name));
        }
    };
    let port = u16::try_from(l.port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| InvalidConfig::InvalidPort(l.name.clone(), l.port))?;

    let mut pairs = Vec::with_capacity(l.routes.len());
    for r in &l.routes {
        match routes.get(r) {
            Some(pair) => pairs.push(pair.clone()),
            None => return Err(InvalidConfig::UnknownRoute(l.name, r.clone())),
        }
    }

    Ok(Listener {
        name: l.name.as_str().into(),
        kind,
        port,
        routes: pairs.into(),
    })
}
