use crate::{Resolve, Update};
use async_stream::try_stream;
use futures::{future, prelude::*};
use std::pin::Pin;
use tonic::{
    self as grpc,
    body::BoxBody,
    client::GrpcService,
    codegen::{Body, Bytes, StdError},
};
use tracing::{debug, info, trace};
use weft_api::registry::v1 as api;
use weft_api::registry::v1::registry_client::RegistryClient;
use weft_policy::{proto as pb, Endpoint};

/// Resolves service names against a registry adapter.
///
/// Each resolution is an independent server stream; the adapter pushes the
/// full membership set on every change, so every decoded update is a
/// [`Update::Reset`]. A watch for a name the registry does not know yields
/// [`Update::DoesNotExist`] and ends.
#[derive(Clone, Debug)]
pub struct Client<S> {
    client: RegistryClient<S>,
}

type UpdatesStream =
    Pin<Box<dyn Stream<Item = Result<Update<Endpoint>, grpc::Status>> + Send + 'static>>;

// === impl Client ===

impl<S> Client<S>
where
    S: GrpcService<BoxBody> + Clone + Send + 'static,
    S::Error: Into<StdError>,
    S::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <S::ResponseBody as Body>::Error: Into<StdError> + Send,
    S::Future: Send,
{
    pub fn new(svc: S) -> Self {
        Self {
            client: RegistryClient::new(svc),
        }
    }
}

impl<T, S> Resolve<T> for Client<S>
where
    T: ToString,
    S: GrpcService<BoxBody> + Clone + Send + 'static,
    S::Error: Into<StdError>,
    S::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <S::ResponseBody as Body>::Error: Into<StdError> + Send,
    S::Future: Send,
{
    type Endpoint = Endpoint;
    type Error = grpc::Status;
    type Resolution = UpdatesStream;
    type Future = future::Ready<Result<Self::Resolution, Self::Error>>;

    fn resolve(&self, target: T) -> Self::Future {
        let service = target.to_string();
        debug!(%service, "Resolving");
        future::ok(Box::pin(watch(self.client.clone(), service)))
    }
}

fn watch<S>(
    mut client: RegistryClient<S>,
    service: String,
) -> impl Stream<Item = Result<Update<Endpoint>, grpc::Status>>
where
    S: GrpcService<BoxBody> + Clone + Send + 'static,
    S::Error: Into<StdError>,
    S::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <S::ResponseBody as Body>::Error: Into<StdError> + Send,
    S::Future: Send,
{
    try_stream! {
        let req = api::WatchRequest {
            service: service.clone(),
        };
        match client.watch(grpc::Request::new(req)).await {
            Err(status) if status.code() == grpc::Code::NotFound => {
                info!(%service, "Does not exist");
                yield Update::DoesNotExist;
            }
            rsp => {
                let rsp = rsp?;
                trace!(metadata = ?rsp.metadata());
                let mut sets = rsp.into_inner();
                loop {
                    let set = match sets.try_next().await {
                        Ok(Some(set)) => set,
                        Ok(None) => break,
                        // The adapter reports a deleted service by failing the
                        // stream; surface that to consumers so they void state
                        // rather than holding the last set forever.
                        Err(status) if status.code() == grpc::Code::NotFound => {
                            info!(%service, "No longer exists");
                            yield Update::DoesNotExist;
                            break;
                        }
                        Err(status) => Err(status)?,
                    };

                    let (endpoints, dropped) = pb::endpoints_from_proto(&set);
                    if dropped > 0 {
                        info!(%service, dropped, "Ignoring undecodable endpoints");
                    }
                    debug!(%service, endpoints = endpoints.len(), "Reset");
                    yield Update::Reset(endpoints);
                }
            }
        }
    }
}
