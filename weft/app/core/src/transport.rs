//! Listener binding, socket options, and original-destination recovery.

use crate::config::ServerConfig;
use futures::prelude::*;
use std::{fmt, io, net::SocketAddr, time::Duration};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::wrappers::TcpListenerStream;
use tracing::warn;

/// The peer address of an accepted connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientAddr(pub SocketAddr);

/// The pre-interception destination of an accepted connection, recovered
/// from the socket's redirect metadata.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrigDstAddr(pub SocketAddr);

#[derive(Debug, Error)]
#[error("failed to accept socket: {0}")]
struct AcceptError(#[source] io::Error);

#[derive(Debug, Error)]
#[error("failed to obtain peer address: {0}")]
struct PeerAddrError(#[source] io::Error);

/// Binds `config.addr`, returning the bound address and a stream of accepted
/// connections with socket options already applied.
pub fn bind(
    config: &ServerConfig,
) -> io::Result<(
    SocketAddr,
    impl Stream<Item = io::Result<(ClientAddr, TcpStream)>> + Send + Sync + 'static,
)> {
    let listen = {
        let l = std::net::TcpListener::bind(config.addr)?;
        // Ensure that O_NONBLOCK is set on the socket before using it with Tokio.
        l.set_nonblocking(true)?;
        TcpListener::from_std(l)?
    };
    let addr = listen.local_addr()?;
    let keepalive = config.keepalive;

    let accept = TcpListenerStream::new(listen).map(move |res| {
        let tcp = res.map_err(|e| io::Error::new(e.kind(), AcceptError(e)))?;
        set_nodelay_or_warn(&tcp);
        set_keepalive_or_warn(&tcp, keepalive);
        let client = ClientAddr(
            tcp.peer_addr()
                .map_err(|e| io::Error::new(e.kind(), PeerAddrError(e)))?,
        );
        Ok((client, tcp))
    });

    Ok((addr, accept))
}

/// Recovers the destination a redirected connection was headed for.
///
/// Interception rewrites the connection's destination to the proxy's own
/// listener; the kernel keeps the original address in the connection's NAT
/// entry, readable with `SO_ORIGINAL_DST`.
#[cfg(target_os = "linux")]
pub fn orig_dst_addr(tcp: &TcpStream) -> io::Result<OrigDstAddr> {
    let sock = socket2::SockRef::from(tcp);
    let addr = match tcp.peer_addr()? {
        SocketAddr::V4(_) => sock.original_dst()?,
        SocketAddr::V6(_) => sock.original_dst_ipv6()?,
    };
    let addr = addr.as_socket().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "invalid original destination")
    })?;
    Ok(OrigDstAddr(addr))
}

#[cfg(not(target_os = "linux"))]
pub fn orig_dst_addr(_: &TcpStream) -> io::Result<OrigDstAddr> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "SO_ORIGINAL_DST is only available on Linux",
    ))
}

fn set_nodelay_or_warn(tcp: &TcpStream) {
    if let Err(error) = tcp.set_nodelay(true) {
        warn!(%error, "Failed to set nodelay");
    }
}

fn set_keepalive_or_warn(tcp: &TcpStream, keepalive: Option<Duration>) {
    let sock = socket2::SockRef::from(tcp);
    let res = match keepalive {
        Some(time) => sock.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(time)),
        None => sock.set_keepalive(false),
    };
    if let Err(error) = res {
        warn!(%error, "Failed to set keepalive");
    }
}

// === impl ClientAddr ===

impl fmt::Display for ClientAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl OrigDstAddr ===

impl From<OrigDstAddr> for SocketAddr {
    fn from(OrigDstAddr(addr): OrigDstAddr) -> SocketAddr {
        addr
    }
}

impl fmt::Display for OrigDstAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn binds_and_accepts() {
        let config = ServerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            keepalive: Some(Duration::from_secs(10)),
        };
        let (addr, accept) = bind(&config).expect("bind");
        assert_ne!(addr.port(), 0, "must bind an ephemeral port");

        let client = TcpStream::connect(addr).await.expect("connect");
        futures::pin_mut!(accept);
        let (peer, _srv) = accept
            .next()
            .await
            .expect("listener must not end")
            .expect("accept");
        assert_eq!(peer.0, client.local_addr().unwrap());
    }
}
