//! An in-process registry for tests.

use crate::{Resolve, Update};
use futures::prelude::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use weft_api::registry::v1 as api;
use weft_policy::{proto as pb, Endpoint, Health};

/// A registry whose contents are controlled by the test.
///
/// [`set`] publishes a full endpoint set for a service and [`remove`] voids
/// it; resolutions observe the current state immediately and every change
/// thereafter. The same state can be served over the wire by wrapping a clone
/// in a `RegistryServer`.
///
/// [`set`]: Mock::set
/// [`remove`]: Mock::remove
#[derive(Clone, Debug, Default)]
pub struct Mock {
    services: Arc<Mutex<HashMap<String, watch::Sender<State>>>>,
}

type State = Option<Vec<Endpoint>>;

/// Builds a healthy, weight-1 endpoint with no zone.
pub fn endpoint(addr: &str) -> Endpoint {
    Endpoint {
        addr: addr.parse().unwrap(),
        zone: None,
        weight: 1,
        health: Health::Healthy,
    }
}

// === impl Mock ===

impl Mock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the full endpoint set for a service.
    pub fn set(&self, service: impl ToString, endpoints: Vec<Endpoint>) {
        self.publish(service.to_string(), Some(endpoints));
    }

    /// Deletes a service; active resolutions observe `DoesNotExist`.
    pub fn remove(&self, service: impl ToString) {
        self.publish(service.to_string(), None);
    }

    fn publish(&self, service: String, state: State) {
        self.services
            .lock()
            .entry(service)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(state);
    }

    fn subscribe(&self, service: String) -> watch::Receiver<State> {
        self.services
            .lock()
            .entry(service)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }
}

impl<T: ToString> Resolve<T> for Mock {
    type Endpoint = Endpoint;
    type Error = weft_error::Infallible;
    type Resolution = stream::BoxStream<'static, Result<Update<Endpoint>, Self::Error>>;
    type Future = future::Ready<Result<Self::Resolution, Self::Error>>;

    fn resolve(&self, target: T) -> Self::Future {
        let rx = self.subscribe(target.to_string());
        let updates = WatchStream::new(rx).map(|state| match state {
            Some(endpoints) => Ok(Update::Reset(endpoints)),
            None => Ok(Update::DoesNotExist),
        });
        future::ok(updates.boxed())
    }
}

#[tonic::async_trait]
impl api::registry_server::Registry for Mock {
    type WatchStream = stream::BoxStream<'static, Result<api::EndpointSet, tonic::Status>>;

    async fn watch(
        &self,
        req: tonic::Request<api::WatchRequest>,
    ) -> Result<tonic::Response<Self::WatchStream>, tonic::Status> {
        let service = req.into_inner().service;
        let mut rx = self.subscribe(service.clone());
        if rx.borrow_and_update().is_none() {
            return Err(tonic::Status::not_found(format!("no service {service}")));
        }

        let sets = async_stream::try_stream! {
            loop {
                // Clone out of the watch before matching: a scrutinee
                // temporary lives for the whole match, and the non-Send
                // `watch::Ref` guard must not be held across the yield that
                // `?` expands to in the error arm.
                let state = rx.borrow_and_update().clone();
                let set = match state {
                    Some(endpoints) => api::EndpointSet {
                        name: service.clone(),
                        endpoints: endpoints.iter().map(pb::endpoint_to_proto).collect(),
                    },
                    None => Err(tonic::Status::not_found(format!("no service {service}")))?,
                };
                yield set;
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };
        Ok(tonic::Response::new(Box::pin(sets)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next<S>(resolution: &mut S) -> Update<Endpoint>
    where
        S: Stream<Item = Result<Update<Endpoint>, weft_error::Infallible>> + Unpin,
    {
        resolution
            .next()
            .await
            .expect("stream must not end")
            .expect("mock resolutions never fail")
    }

    #[tokio::test(flavor = "current_thread")]
    async fn publishes_state_changes() {
        let mock = Mock::new();
        let mut resolution = mock
            .resolve("web")
            .await
            .expect("mock resolutions never fail");

        assert_eq!(next(&mut resolution).await, Update::DoesNotExist);

        let ep = endpoint("10.0.0.1:8080");
        mock.set("web", vec![ep.clone()]);
        assert_eq!(next(&mut resolution).await, Update::Reset(vec![ep]));

        mock.remove("web");
        assert_eq!(next(&mut resolution).await, Update::DoesNotExist);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn resolves_current_state_first() {
        let mock = Mock::new();
        let ep = endpoint("10.0.0.1:8080");
        mock.set("web", vec![ep.clone()]);

        let mut resolution = mock
            .resolve("web")
            .await
            .expect("mock resolutions never fail");
        assert_eq!(next(&mut resolution).await, Update::Reset(vec![ep]));
    }
}
