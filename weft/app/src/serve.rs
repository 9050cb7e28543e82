//! The accept loop shared by the proxy's listeners.

use futures::prelude::*;
use http::{Request, Response};
use hyper::{server::conn::Http, Body};
use std::io;
use tokio::net::TcpStream;
use tracing::{debug, debug_span, info, warn, Instrument};
use weft_app_core::{
    drain, is_caused_by,
    svc::{NewService, Service},
    transport::{self, ClientAddr, OrigDstAddr},
    Error,
};

/// One accepted connection, as seen by a listener's `NewService`.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Accepted {
    pub client: ClientAddr,

    /// The destination the connection was headed for before interception.
    /// `None` when the connection was made to the listener directly.
    pub orig_dst: Option<OrigDstAddr>,
}

/// Serves `listen` until `drain` is signaled.
///
/// Each accepted connection is served on its own task with a service built
/// by `new_service`. Once a drain begins no further connections are
/// accepted, while connections already being served finish behind their own
/// drain handles; the drain resolves only after the last of them closes.
pub(crate) async fn serve<N, S>(
    listen: impl Stream<Item = io::Result<(ClientAddr, TcpStream)>>,
    new_service: N,
    drain: drain::Watch,
) where
    N: NewService<Accepted, Service = S>,
    S: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
    S::Error: Into<Error>,
    S::Future: Send + 'static,
{
    let accept = {
        let drain = drain.clone();
        async move {
            futures::pin_mut!(listen);
            loop {
                let (client, tcp) = match listen.next().await {
                    Some(Ok(conn)) => conn,
                    Some(Err(error)) => {
                        warn!(%error, "Server failed to accept connection");
                        continue;
                    }
                    None => return,
                };
                let accepted = Accepted {
                    client,
                    orig_dst: transport::orig_dst_addr(&tcp).ok(),
                };
                let span = debug_span!("accept", client.addr = %client);
                let service = new_service.new_service(accepted);
                let drain = drain.clone();
                tokio::spawn(
                    async move {
                        let conn = Http::new().serve_connection(tcp, service);
                        tokio::pin!(conn);
                        let res = drain
                            .watch(conn.as_mut(), |c| c.as_mut().graceful_shutdown())
                            .await;
                        match res {
                            Ok(()) => debug!("Connection closed"),
                            Err(error) if is_caused_by::<io::Error>(&error) => {
                                debug!(%error, "Connection closed")
                            }
                            Err(error) => info!(%error, "Connection closed"),
                        }
                    }
                    .instrument(span.or_current()),
                );
            }
        }
    };

    tokio::select! {
        res = accept => res,
        _ = drain.signaled() => {
            debug!("Drained; no longer accepting connections");
        }
    }
}
