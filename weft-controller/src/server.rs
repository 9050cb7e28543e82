//! The discovery server.
//!
//! Serves `weft.discovery.v1.Discovery`: per-workload configuration bundles
//! and per-service endpoint membership, each as a server stream backed by
//! the index's watch channels. A subscriber that reads slowly only misses
//! intermediate values; it never blocks the index or other subscribers.

use crate::SharedIndex;
use futures::prelude::*;
use std::pin::Pin;
use tokio::sync::watch;
use tonic::{Request, Response, Status};
use tracing::debug;
use weft_api::discovery::v1 as pb;
use weft_api::discovery::v1::discovery_server::{Discovery, DiscoveryServer};
use weft_api::registry::v1 as pb_registry;
use weft_drain as drain;

#[derive(Clone, Debug)]
pub struct Server {
    index: SharedIndex,
    drain: drain::Watch,
}

type BoxWatchStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

// === impl Server ===

impl Server {
    pub fn new(index: SharedIndex, drain: drain::Watch) -> Self {
        Self { index, drain }
    }

    pub fn svc(self) -> DiscoveryServer<Self> {
        DiscoveryServer::new(self)
    }
}

#[tonic::async_trait]
impl Discovery for Server {
    type WatchConfigStream = BoxWatchStream<pb::ConfigBundle>;

    async fn watch_config(
        &self,
        req: Request<pb::ConfigRequest>,
    ) -> Result<Response<Self::WatchConfigStream>, Status> {
        let workload = req.into_inner().workload;
        if workload.is_empty() {
            return Err(Status::invalid_argument("workload must be set"));
        }
        debug!(%workload, "Configuration watch opened");
        let rx = self.index.write().workload_rx(&workload);
        Ok(Response::new(config_stream(self.drain.clone(), rx)))
    }

    type WatchEndpointsStream = BoxWatchStream<pb_registry::EndpointSet>;

    async fn watch_endpoints(
        &self,
        req: Request<pb::EndpointsRequest>,
    ) -> Result<Response<Self::WatchEndpointsStream>, Status> {
        let pb::EndpointsRequest { workload, service } = req.into_inner();
        if workload.is_empty() || service.is_empty() {
            return Err(Status::invalid_argument("workload and service must be set"));
        }
        debug!(%workload, %service, "Endpoint watch opened");
        let rx = self
            .index
            .write()
            .endpoints_rx(&workload, &service)
            .map_err(|denied| Status::not_found(denied.to_string()))?;
        Ok(Response::new(endpoints_stream(self.drain.clone(), rx)))
    }
}

fn config_stream(
    drain: drain::Watch,
    mut rx: watch::Receiver<Option<pb::ConfigBundle>>,
) -> BoxWatchStream<pb::ConfigBundle> {
    Box::pin(async_stream::try_stream! {
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        loop {
            // A workload without intent has nothing to send; the proxy's own
            // pass-through seed stays in effect until a document appears.
            let bundle = rx.borrow_and_update().clone();
            if let Some(bundle) = bundle {
                yield bundle;
            }

            tokio::select! {
                res = rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                }

                // Close the stream when the server starts shutting down so
                // open watches do not hold it.
                _ = &mut shutdown => {
                    return;
                }
            }
        }
    })
}

fn endpoints_stream(
    drain: drain::Watch,
    mut rx: watch::Receiver<pb_registry::EndpointSet>,
) -> BoxWatchStream<pb_registry::EndpointSet> {
    Box::pin(async_stream::try_stream! {
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        loop {
            let set = rx.borrow_and_update().clone();
            yield set;

            tokio::select! {
                res = rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                }

                _ = &mut shutdown => {
                    return;
                }
            }
        }
    })
}
