//! The main entrypoint for the injector.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use weft_error::Error;
use weft_inject::{inject, Injection, Manifest, Params};

#[derive(Debug, Parser)]
#[clap(name = "weft-inject", about = "Attaches the weft proxy to workload manifests")]
struct Args {
    #[clap(long, default_value = "weft=info,warn", env = "WEFT_INJECT_LOG")]
    log_level: String,

    /// The workload manifest to read, or `-` for stdin.
    #[clap(long, default_value = "-")]
    manifest: String,

    /// Where the result is written, or `-` for stdout.
    #[clap(long, default_value = "-")]
    output: String,

    /// Directory receiving the generated baseline intent document.
    #[clap(long)]
    intent_dir: Option<PathBuf>,

    /// Image run as the proxy sidecar.
    #[clap(long, default_value = "weft/proxy:0.1.0")]
    proxy_image: String,

    /// Image run as the interception init step.
    #[clap(long, default_value = "weft/init:0.1.0")]
    init_image: String,

    /// Controller address handed to injected proxies.
    #[clap(long, default_value = "weft-controller:8100", env = "WEFT_CONTROL_ADDR")]
    control_addr: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    Args::parse().run().await
}

impl Args {
    async fn run(self) -> Result<(), Error> {
        let Self {
            log_level,
            manifest,
            output,
            intent_dir,
            proxy_image,
            init_image,
            control_addr,
        } = self;

        // The mutated manifest goes to stdout; diagnostics must not.
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::try_new(log_level)?)
            .with_writer(std::io::stderr)
            .init();

        let doc = read_input(&manifest).await?;
        let manifest = Manifest::from_yaml(&doc)?;
        let params = Params {
            proxy_image,
            init_image,
            control_addr,
        };

        match inject(manifest, &params)? {
            Injection::Unmarked(manifest) => {
                debug!(workload = %manifest.workload(), "Manifest is not marked for injection");
                write_output(&output, &manifest.to_yaml()?).await?;
            }
            Injection::AlreadyInjected(manifest) => {
                debug!(workload = %manifest.workload(), "Proxy is already attached");
                write_output(&output, &manifest.to_yaml()?).await?;
            }
            Injection::Injected { manifest, intent } => {
                info!(workload = %intent.workload, "Injected proxy");
                if let Some(dir) = intent_dir {
                    let path = dir.join(intent_file_name(&intent.workload));
                    tokio::fs::write(&path, serde_yaml::to_string(&intent)?).await?;
                    info!(path = %path.display(), "Wrote baseline intent");
                }
                write_output(&output, &manifest.to_yaml()?).await?;
            }
        }
        Ok(())
    }
}

async fn read_input(path: &str) -> Result<String, Error> {
    if path == "-" {
        let mut doc = String::new();
        tokio::io::stdin().read_to_string(&mut doc).await?;
        return Ok(doc);
    }
    Ok(tokio::fs::read_to_string(path).await?)
}

async fn write_output(path: &str, doc: &str) -> Result<(), Error> {
    if path == "-" {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(doc.as_bytes()).await?;
        stdout.flush().await?;
        return Ok(());
    }
    tokio::fs::write(path, doc).await?;
    Ok(())
}

/// One file per workload; path separators in the identity cannot appear in
/// the file name.
fn intent_file_name(workload: &str) -> String {
    let safe = workload.replace(['/', ':'], "-");
    format!("{safe}.yaml")
}
