//! Configures and runs the proxy.
//!
//! [`App::build`] binds the outbound, inbound, and admin listeners and
//! wires them to the controller watch without accepting any connections;
//! [`App::spawn`] starts the accept loops and returns the drain signal used
//! for graceful shutdown.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

pub use weft_app_admin as admin;
pub use weft_app_core as core;
pub use weft_app_inbound as inbound;
pub use weft_app_outbound as outbound;

pub use self::core::{config::Config, trace};

mod serve;

use self::{
    admin::{Admin, Readiness, RefreshGauges},
    inbound::Inbound,
    outbound::Outbound,
    serve::Accepted,
};
use std::{future::Future, net::SocketAddr, pin::Pin, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{info_span, Instrument};
use weft_app_core::{
    config::ServerConfig,
    control::Control,
    drain,
    metrics::{prom::Registry, Metrics, Serve},
    policy::{intent::Intent, ConfigSnapshot},
    transport, Error,
};

/// The proxy's servers, bound but not yet accepting.
pub struct App {
    admin_addr: SocketAddr,
    inbound_addr: SocketAddr,
    outbound_addr: SocketAddr,
    shutdown_grace_period: Duration,
    ready: Readiness,
    drain_tx: drain::Signal,
    servers: Vec<Pin<Box<dyn Future<Output = ()> + Send + 'static>>>,
}

// === impl App ===

impl App {
    /// Binds the proxy's listeners and connects them to the control plane.
    ///
    /// The configuration watch starts from the workload's pass-through
    /// bundle, so a proxy that comes up before (or without) its controller
    /// forwards traffic instead of refusing it. `shutdown_tx` is notified
    /// when a shutdown is requested through the admin server.
    pub async fn build(
        config: Config,
        shutdown_tx: mpsc::UnboundedSender<()>,
    ) -> Result<Self, Error> {
        let Config {
            workload,
            zone,
            app_port,
            control,
            outbound,
            inbound,
            admin,
            shutdown_grace_period,
        } = config;

        let mut registry = Registry::default();
        let metrics = Metrics::register(&mut registry);

        let control = Control::new(&control, workload.as_str(), metrics.control.clone())?;
        let initial = Intent::passthrough(workload.as_str(), app_port).to_bundle()?;
        let initial = Arc::new(ConfigSnapshot::try_from(initial)?);
        let config_rx = control.spawn_config_watch(initial);

        let (outbound_addr, outbound_listen) = transport::bind(&outbound)?;
        let (inbound_addr, inbound_listen) = transport::bind(&inbound)?;
        let (admin_addr, admin_listen) = transport::bind(&ServerConfig {
            addr: admin.addr,
            keepalive: None,
        })?;

        let outbound = Outbound::new(
            config_rx.clone(),
            control,
            zone.map(Into::into),
            metrics.clone(),
            outbound_addr.port(),
        );
        let inbound = Inbound::new(config_rx.clone(), inbound_addr.port(), app_port, metrics);

        let ready = Readiness::new(false);
        let refresh: RefreshGauges = {
            let outbound = outbound.clone();
            Arc::new(move || outbound.refresh_gauges())
        };
        let admin = Admin::new(
            Serve::new(registry),
            config_rx,
            ready.clone(),
            refresh,
            shutdown_tx,
            admin.shutdown_enabled,
        );

        let (drain_tx, drain_rx) = drain::channel();
        let servers: Vec<Pin<Box<dyn Future<Output = ()> + Send + 'static>>> = vec![
            Box::pin(
                serve::serve(
                    outbound_listen,
                    move |accepted: Accepted| outbound.handler(accepted.orig_dst),
                    drain_rx.clone(),
                )
                .instrument(info_span!("outbound")),
            ),
            Box::pin(
                serve::serve(
                    inbound_listen,
                    move |_: Accepted| inbound.handler(),
                    drain_rx.clone(),
                )
                .instrument(info_span!("inbound")),
            ),
            Box::pin(
                serve::serve(
                    admin_listen,
                    move |accepted: Accepted| admin.handler(accepted.client.0),
                    drain_rx,
                )
                .instrument(info_span!("admin")),
            ),
        ];

        Ok(Self {
            admin_addr,
            inbound_addr,
            outbound_addr,
            shutdown_grace_period,
            ready,
            drain_tx,
            servers,
        })
    }

    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    pub fn inbound_addr(&self) -> SocketAddr {
        self.inbound_addr
    }

    pub fn outbound_addr(&self) -> SocketAddr {
        self.outbound_addr
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        self.shutdown_grace_period
    }

    /// Starts every accept loop and marks the proxy ready.
    ///
    /// The returned signal begins a graceful drain: listeners stop
    /// accepting, in-flight requests complete, and the drain resolves once
    /// the last connection closes.
    pub fn spawn(self) -> drain::Signal {
        for server in self.servers {
            tokio::spawn(server);
        }
        self.ready.set(true);
        self.drain_tx
    }
}
