//! Registry adapter consumption.
//!
//! One resolution per registry service named anywhere in the intent set,
//! kept alive across adapter failures so that membership recovers without
//! any intent change. Updates are folded into a full set and recorded in
//! the index, which fans them out to subscribed proxies.

use crate::SharedIndex;
use futures::prelude::*;
use tonic::transport;
use tracing::{info_span, Instrument};
use weft_error::Error;
use weft_exp_backoff::{ExponentialBackoff, ExponentialBackoffStream};
use weft_policy::Endpoint;
use weft_registry::{sustain, Client, Update};

/// Starts registry resolutions on behalf of the index.
#[derive(Clone, Debug)]
pub struct Watcher {
    client: Client<transport::Channel>,
    backoff: ExponentialBackoff,
    index: SharedIndex,
}

// === impl Watcher ===

impl Watcher {
    /// Builds a watcher against the registry adapter.
    ///
    /// The channel connects lazily; an unreachable adapter surfaces as
    /// stream errors that each per-service resolution backs off and retries.
    pub fn new(
        addr: &str,
        backoff: ExponentialBackoff,
        index: SharedIndex,
    ) -> Result<Self, Error> {
        let channel = transport::Endpoint::from_shared(format!("http://{addr}"))?.connect_lazy();
        Ok(Self {
            client: Client::new(channel),
            backoff,
            index,
        })
    }

    /// Spawns the resolution for one service.
    ///
    /// Expected to be called once per service: the index reports a service
    /// as new only the first time intent names it. The task runs for the
    /// life of the process; no registry error is fatal.
    pub fn spawn_watch(&self, service: String) {
        let index = self.index.clone();
        let backoff = self.backoff;
        let recover = coerce_recover(move |_| Ok(backoff.stream()));
        let updates = sustain(self.client.clone(), recover, service.clone());
        let span = info_span!("registry", %service);
        tokio::spawn(
            async move {
                tokio::pin!(updates);
                let mut endpoints: Vec<Endpoint> = Vec::new();
                while let Some(update) = updates.next().await {
                    fold(&mut endpoints, update);
                    index.write().apply_endpoints(&service, &endpoints);
                }
            }
            .instrument(span),
        );
    }
}

/// Pins the recovery closure to a signature higher-ranked over the error's
/// trait-object lifetime. The spawned task holds the sustained stream across
/// `tokio::spawn`'s `'static` bound, and rustc's outlives check on the
/// generator rejects a closure whose signature is fixed to `'static`
/// (rust-lang/rust#102211); the closure itself is returned unchanged.
fn coerce_recover<F>(f: F) -> F
where
    F: for<'a> Fn(
        Box<dyn std::error::Error + Send + Sync + 'a>,
    ) -> Result<ExponentialBackoffStream, Box<dyn std::error::Error + Send + Sync + 'a>>,
{
    f
}

/// Applies one membership update to the running set.
fn fold(endpoints: &mut Vec<Endpoint>, update: Update<Endpoint>) {
    match update {
        Update::Reset(eps) => *endpoints = eps,
        Update::Add(eps) => {
            for ep in eps {
                match endpoints.iter_mut().find(|e| e.addr == ep.addr) {
                    Some(existing) => *existing = ep,
                    None => endpoints.push(ep),
                }
            }
        }
        Update::Remove(addrs) => endpoints.retain(|e| !addrs.contains(&e.addr)),
        Update::DoesNotExist => endpoints.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_policy::Health;

    fn ep(addr: &str, weight: u32) -> Endpoint {
        Endpoint {
            addr: addr.parse().unwrap(),
            zone: None,
            weight,
            health: Health::Healthy,
        }
    }

    #[test]
    fn fold_applies_membership_updates() {
        let mut set = Vec::new();

        fold(&mut set, Update::Reset(vec![ep("10.0.0.1:80", 1)]));
        assert_eq!(set.len(), 1);

        // An add for a known address replaces it in place.
        fold(
            &mut set,
            Update::Add(vec![ep("10.0.0.1:80", 2), ep("10.0.0.2:80", 1)]),
        );
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].weight, 2);

        fold(&mut set, Update::Remove(vec!["10.0.0.1:80".parse().unwrap()]));
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].addr, "10.0.0.2:80".parse().unwrap());

        fold(&mut set, Update::DoesNotExist);
        assert!(set.is_empty());
    }
}
