//! A pod-shaped workload manifest.
//!
//! The injector mutates manifests it does not own, so the model here types
//! only what injection reads or writes and flattens everything else into
//! untyped extras that round-trip untouched. Opting in, reserving ports,
//! pinning a zone, and declaring dependencies are all annotations under the
//! `weft.io/` prefix; the rest is derived from the containers the manifest
//! already declares.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Set to `enabled` to opt a workload into injection.
pub const INJECT_ANNOTATION: &str = "weft.io/inject";
/// Set by the injector once the proxy is attached.
pub const STATUS_ANNOTATION: &str = "weft.io/status";
/// Comma-separated ports that bypass the mesh in both directions.
pub const RESERVED_PORTS_ANNOTATION: &str = "weft.io/reserved-ports";
/// The failure zone this workload runs in.
pub const ZONE_ANNOTATION: &str = "weft.io/zone";
/// Comma-separated registry services this workload calls.
pub const DEPENDENCIES_ANNOTATION: &str = "weft.io/dependencies";

pub const STATUS_INJECTED: &str = "injected";

#[derive(Debug, thiserror::Error)]
pub enum InvalidManifest {
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid `{0}` annotation: `{1}`")]
    Annotation(&'static str, String),
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Manifest {
    pub metadata: Metadata,
    pub spec: WorkloadSpec,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<String>,
}

// === impl Manifest ===

impl Manifest {
    pub fn from_yaml(doc: &str) -> Result<Self, InvalidManifest> {
        Ok(serde_yaml::from_str(doc)?)
    }

    pub fn to_yaml(&self) -> Result<String, InvalidManifest> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The workload identity reported to the controller, `namespace/name`
    /// when a namespace is set.
    pub fn workload(&self) -> String {
        match &self.metadata.namespace {
            Some(ns) => format!("{ns}/{}", self.metadata.name),
            None => self.metadata.name.clone(),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// Whether the manifest opts into injection.
    pub fn injectable(&self) -> bool {
        self.annotation(INJECT_ANNOTATION) == Some("enabled")
    }

    /// The workload's primary serving port: the first port of the first
    /// container, by declaration order.
    pub fn app_port(&self) -> Option<u16> {
        self.spec
            .containers
            .first()
            .and_then(|c| c.ports.first())
            .map(|p| p.container_port)
    }

    /// Every declared container port, sorted and deduplicated. Ingress on
    /// these is intercepted.
    pub fn app_ports(&self) -> Vec<u16> {
        self.spec
            .containers
            .iter()
            .flat_map(|c| c.ports.iter().map(|p| p.container_port))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Ports the `weft.io/reserved-ports` annotation exempts from the mesh,
    /// sorted and deduplicated.
    pub fn reserved_ports(&self) -> Result<Vec<u16>, InvalidManifest> {
        let Some(value) = self.annotation(RESERVED_PORTS_ANNOTATION) else {
            return Ok(Vec::new());
        };
        let mut ports = BTreeSet::new();
        for part in list(value) {
            let port = part.parse::<u16>().map_err(|_| {
                InvalidManifest::Annotation(RESERVED_PORTS_ANNOTATION, value.to_string())
            })?;
            ports.insert(port);
        }
        Ok(ports.into_iter().collect())
    }

    pub fn zone(&self) -> Option<&str> {
        self.annotation(ZONE_ANNOTATION)
    }

    /// Registry services named by the `weft.io/dependencies` annotation, in
    /// declaration order, deduplicated.
    pub fn dependencies(&self) -> Vec<String> {
        let Some(value) = self.annotation(DEPENDENCIES_ANNOTATION) else {
            return Vec::new();
        };
        let mut deps: Vec<String> = Vec::new();
        for part in list(value) {
            if !deps.iter().any(|d| d == part) {
                deps.push(part.to_string());
            }
        }
        deps
    }
}

fn list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}
