//! The main entrypoint for the controller.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

use clap::Parser;
use futures::prelude::*;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, info_span, instrument, Instrument};
use weft_controller::{intents, registry, server, Index, SharedIndex};
use weft_drain as drain;
use weft_error::Error;
use weft_exp_backoff::ExponentialBackoff;
use weft_signal as signal;

#[derive(Debug, Parser)]
#[clap(name = "weft-controller", about = "The weft control plane")]
struct Args {
    #[clap(long, default_value = "weft=info,warn", env = "WEFT_CONTROLLER_LOG")]
    log_level: String,

    /// Directory of per-workload intent documents.
    #[clap(long, default_value = "/etc/weft/intents")]
    intent_dir: PathBuf,

    /// Seconds between re-reads of the intent directory.
    #[clap(long, default_value = "10")]
    scan_interval_secs: u64,

    #[clap(long, default_value = "0.0.0.0:8100")]
    grpc_addr: SocketAddr,

    /// Address of the registry adapter.
    #[clap(long, default_value = "127.0.0.1:8200", env = "WEFT_REGISTRY_ADDR")]
    registry_addr: String,
}

// Registry stream recovery, matching the proxy's control-plane defaults.
const BACKOFF_MIN: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(10);
const BACKOFF_JITTER: f64 = 0.1;

#[tokio::main]
async fn main() -> Result<(), Error> {
    Args::parse().run().await
}

impl Args {
    async fn run(self) -> Result<(), Error> {
        let Self {
            log_level,
            intent_dir,
            scan_interval_secs,
            grpc_addr,
            registry_addr,
        } = self;

        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::try_new(log_level)?)
            .init();

        let index = Index::shared();

        let backoff = ExponentialBackoff::new_unchecked(BACKOFF_MIN, BACKOFF_MAX, BACKOFF_JITTER);
        let watcher = registry::Watcher::new(&registry_addr, backoff, index.clone())?;

        tokio::spawn(
            intents::watch(
                intent_dir,
                Duration::from_secs(scan_interval_secs),
                index.clone(),
                watcher,
            )
            .instrument(info_span!("intents")),
        );

        let (drain_tx, drain_rx) = drain::channel();
        let server = tokio::spawn(grpc(grpc_addr, index, drain_rx));

        tokio::select! {
            _ = signal::shutdown() => {}
            res = server => match res {
                Ok(res) => res?,
                Err(error) => return Err(error.into()),
            },
        }

        // Wait for open watch streams to observe the shutdown and close.
        drain_tx.drain().await;
        Ok(())
    }
}

#[instrument(skip_all, fields(port = %addr.port()))]
async fn grpc(addr: SocketAddr, index: SharedIndex, drain: drain::Watch) -> Result<(), Error> {
    let svc = server::Server::new(index, drain.clone()).svc();

    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tokio::pin! {
        let srv = tonic::transport::Server::builder()
            .add_service(svc)
            .serve_with_shutdown(addr, close_rx.map(|_| {}));
    }

    info!(%addr, "Discovery server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?;
        }
    }
    Ok(())
}
