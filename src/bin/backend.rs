#![forbid(unsafe_code)]

//! Gateway binary: resolves configuration, installs logging and serves the
//! router built by `leantube::server`.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use leantube::{
    config::{RuntimeOverrides, resolve_runtime_config},
    logging::init_logging,
    security::ensure_not_root,
    server::{AppState, build_router, serve},
    upstream::InnerTubeClient,
};

/// Flags override the process environment, which overrides the `.env` file.
#[derive(Debug, Parser)]
#[command(name = "backend", about = "Gateway for the TV client and its assets")]
struct BackendArgs {
    /// Directory holding the stored assets.
    #[arg(long)]
    assets_root: Option<PathBuf>,
    /// Directory for the gateway log, also served under /logs.
    #[arg(long)]
    logs_root: Option<PathBuf>,
    /// Document served at /.
    #[arg(long = "index")]
    index_path: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Alternate `.env` file.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            assets_root: self.assets_root,
            logs_root: self.logs_root,
            index_path: self.index_path,
            gateway_port: self.port,
            gateway_host: self.host,
            env_path: self.env_file,
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/GATEWAY_HOST")
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = resolve_runtime_config(BackendArgs::parse().into_overrides())?;

    ensure_not_root("backend")?;
    init_logging(&config.logs_root)?;

    let host = parse_host_arg(&config.gateway_host)?;
    let addr = SocketAddr::new(host, config.gateway_port);

    let upstream = Arc::new(InnerTubeClient::new(config.upstream.clone()));
    let router = build_router(AppState::new(&config, upstream));

    tracing::info!(
        assets_root = %config.assets_root.display(),
        upstream = %config.upstream.innertube_base_url,
        "starting gateway"
    );
    serve(router, addr).await
}
