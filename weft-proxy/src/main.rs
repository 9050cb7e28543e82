//! The main entrypoint for the proxy.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

use tokio::{sync::mpsc, time};
use tracing::{info, warn};
use weft_app::{trace, App, Config};
use weft_signal as signal;

mod rt;

const EX_USAGE: i32 = 64;

fn main() {
    let start_time = time::Instant::now();
    if let Err(error) = trace::Settings::from_env(start_time).init() {
        eprintln!("Invalid logging configuration: {}", error);
        std::process::exit(EX_USAGE);
    }

    // Load configuration from the environment without binding ports.
    let config = match Config::try_from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(EX_USAGE);
        }
    };

    // Builds a runtime with the appropriate number of cores:
    // `WEFT_PROXY_CORES` env or the number of available CPUs.
    rt::build().block_on(async move {
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
        let app = match App::build(config, shutdown_tx).await {
            Ok(app) => app,
            Err(e) => {
                eprintln!("Initialization failure: {}", e);
                std::process::exit(1);
            }
        };

        info!("Admin interface on {}", app.admin_addr());
        info!("Inbound interface on {}", app.inbound_addr());
        info!("Outbound interface on {}", app.outbound_addr());

        let grace = app.shutdown_grace_period();
        let drain = app.spawn();
        tokio::select! {
            _ = signal::shutdown() => {
                info!("Received shutdown signal");
            }
            _ = shutdown_rx.recv() => {
                info!("Received shutdown via admin interface");
            }
        }
        if time::timeout(grace, drain.drain()).await.is_err() {
            warn!(?grace, "Graceful shutdown did not complete in time");
        }
    });
}
