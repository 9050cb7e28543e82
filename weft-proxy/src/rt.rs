use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};

pub(crate) fn build() -> Runtime {
    // The proxy runs an admin server alongside the data path, but it would
    // be wasteful to dedicate a whole core to it; the one runtime consumes
    // all available cores. The basic scheduler is used when the threaded
    // scheduler would provide no benefit.
    let cores = std::env::var("WEFT_PROXY_CORES")
        .ok()
        .and_then(|v| {
            let opt = v.parse::<usize>().ok().filter(|n| *n > 0);
            if opt.is_none() {
                warn!(WEFT_PROXY_CORES = %v, "Ignoring invalid configuration");
            }
            opt
        })
        .unwrap_or_else(num_cpus::get);

    match cores {
        0 | 1 => {
            info!("Using single-threaded proxy runtime");
            Builder::new_current_thread()
                .enable_all()
                .thread_name("proxy")
                .build()
                .expect("failed to build basic runtime!")
        }
        cores => {
            info!(%cores, "Using multi-threaded proxy runtime");
            Builder::new_multi_thread()
                .enable_all()
                .thread_name("proxy")
                .worker_threads(cores)
                .max_blocking_threads(cores)
                .build()
                .expect("failed to build threaded runtime!")
        }
    }
}
