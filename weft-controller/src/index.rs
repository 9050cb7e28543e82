//! The configuration index.
//!
//! Holds every workload's authoritative intent and every registry service's
//! last-reported membership, exposing both as `tokio::sync::watch` channels
//! keyed the way proxies subscribe. All recomputation happens here, scoped
//! to the entry that changed; identical recomputation publishes nothing, so
//! subscribers only ever wake for material changes.

use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use weft_api::discovery::v1 as pb;
use weft_api::registry::v1 as pb_registry;
use weft_policy::intent::ListenerSpec;
use weft_policy::{proto, Endpoint, Intent};

pub type SharedIndex = Arc<RwLock<Index>>;

#[derive(Debug, Default)]
pub struct Index {
    workloads: HashMap<String, Workload>,
    services: HashMap<String, Service>,
}

/// One workload's compiled configuration.
#[derive(Debug)]
struct Workload {
    /// The authoritative intent; `None` before a document is first loaded
    /// and after its document has been removed.
    intent: Option<Intent>,
    /// Holds `None` while there is nothing to send, so that a proxy's own
    /// pass-through seed stays in effect for workloads the controller does
    /// not know.
    watch: watch::Sender<Option<pb::ConfigBundle>>,
}

/// One registry service's last-reported membership.
#[derive(Debug)]
struct Service {
    watch: watch::Sender<pb_registry::EndpointSet>,
}

/// Why an endpoint subscription was refused.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Denied {
    #[error("no workload {0}")]
    UnknownWorkload(String),
    #[error("workload {workload} does not name service {service}")]
    UnknownService { workload: String, service: String },
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Replaces the authoritative intent set with the result of a directory
    /// scan.
    ///
    /// Workloads whose document disappeared revert to a pass-through
    /// baseline; the rest are recompiled, publishing only where the computed
    /// version actually changed. Returns registry services named for the
    /// first time, so the caller can start their resolutions.
    pub fn reset(&mut self, intents: HashMap<String, Intent>) -> Vec<String> {
        let removed = self
            .workloads
            .iter()
            .filter(|(name, w)| w.intent.is_some() && !intents.contains_key(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        for name in removed {
            self.revert(&name);
        }

        let mut new_services = Vec::new();
        for (_, intent) in intents {
            for cluster in &intent.clusters {
                if let Some(service) = &cluster.registry {
                    if !self.services.contains_key(service.as_str()) {
                        debug!(%service, "Tracking service");
                        new_services.push(service.clone());
                    }
                    self.service_entry(service);
                }
            }
            self.apply(intent);
        }
        new_services
    }

    /// Records a registry service's full membership, republishing its watch
    /// if the set materially changed.
    pub fn apply_endpoints(&mut self, service: &str, endpoints: &[Endpoint]) {
        let set = pb_registry::EndpointSet {
            name: service.to_string(),
            endpoints: endpoints.iter().map(proto::endpoint_to_proto).collect(),
        };
        let count = set.endpoints.len();
        let updated = self.service_entry(service).watch.send_if_modified(move |current| {
            if *current == set {
                return false;
            }
            *current = set;
            true
        });
        if updated {
            debug!(%service, endpoints = count, "Endpoints updated");
        }
    }

    /// Subscribes to a workload's configuration bundle, registering the
    /// workload if it has never been seen.
    pub fn workload_rx(&mut self, workload: &str) -> watch::Receiver<Option<pb::ConfigBundle>> {
        self.workloads
            .entry(workload.to_string())
            .or_insert_with(Workload::new)
            .watch
            .subscribe()
    }

    /// Subscribes to a registry service's membership on behalf of a
    /// workload.
    ///
    /// The subscription is scoped: the workload's current intent must name
    /// the service in one of its clusters. A proxy can therefore only ever
    /// observe membership its own configuration depends on.
    pub fn endpoints_rx(
        &mut self,
        workload: &str,
        service: &str,
    ) -> Result<watch::Receiver<pb_registry::EndpointSet>, Denied> {
        let entry = self
            .workloads
            .get(workload)
            .ok_or_else(|| Denied::UnknownWorkload(workload.to_string()))?;
        let named = entry
            .intent
            .as_ref()
            .map(|intent| {
                intent
                    .clusters
                    .iter()
                    .any(|c| c.registry.as_deref() == Some(service))
            })
            .unwrap_or(false);
        if !named {
            return Err(Denied::UnknownService {
                workload: workload.to_string(),
                service: service.to_string(),
            });
        }
        Ok(self.service_entry(service).watch.subscribe())
    }

    fn apply(&mut self, intent: Intent) {
        let entry = self
            .workloads
            .entry(intent.workload.clone())
            .or_insert_with(Workload::new);
        if entry.intent.as_ref() == Some(&intent) {
            return;
        }
        match intent.to_bundle() {
            Ok(bundle) => {
                entry.publish(&intent.workload, bundle);
                entry.intent = Some(intent);
            }
            // The last compiled bundle stays in effect.
            Err(error) => warn!(workload = %intent.workload, %error, "Ignoring invalid intent"),
        }
    }

    fn revert(&mut self, workload: &str) {
        let Some(entry) = self.workloads.get_mut(workload) else {
            return;
        };
        let Some(last) = entry.intent.take() else {
            return;
        };
        match baseline(&last).to_bundle() {
            Ok(bundle) => {
                info!(%workload, "Intent removed; reverting to pass-through");
                entry.publish(workload, bundle);
            }
            Err(error) => warn!(%workload, %error, "Failed to compute pass-through baseline"),
        }
    }

    fn service_entry(&mut self, service: &str) -> &mut Service {
        self.services
            .entry(service.to_string())
            .or_insert_with(|| Service::new(service))
    }
}

// === impl Workload ===

impl Workload {
    fn new() -> Self {
        let (watch, _) = watch::channel(None);
        Self {
            intent: None,
            watch,
        }
    }

    fn publish(&self, workload: &str, bundle: pb::ConfigBundle) {
        let version = bundle.version.clone();
        let updated = self.watch.send_if_modified(move |current| {
            if current.as_ref().map(|b| b.version.as_str()) == Some(bundle.version.as_str()) {
                return false;
            }
            *current = Some(bundle);
            true
        });
        if updated {
            info!(%workload, %version, "Configuration updated");
        }
    }
}

// === impl Service ===

impl Service {
    fn new(service: &str) -> Self {
        let (watch, _) = watch::channel(pb_registry::EndpointSet {
            name: service.to_string(),
            endpoints: Vec::new(),
        });
        Self { watch }
    }
}

/// The pass-through rendition of an intent: the same interception surface
/// with no routes and no clusters. Inbound listeners keep their application
/// port so compilation still synthesizes local forwarding to the workload.
fn baseline(last: &Intent) -> Intent {
    Intent {
        workload: last.workload.clone(),
        listeners: last
            .listeners
            .iter()
            .map(|l| ListenerSpec {
                name: l.name.clone(),
                kind: l.kind,
                port: l.port,
                routes: Vec::new(),
                app_port: l.app_port,
            })
            .collect(),
        routes: Vec::new(),
        clusters: Vec::new(),
    }
}
