// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use kachery_config::{Config, NodeConfig};
use tracing::{error, info};

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(long)]
    config_path: PathBuf,

    #[clap(long, help = "Override the metrics listen address from the config file")]
    listen_address: Option<SocketAddr>,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut config = match NodeConfig::load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config at {}: {e:?}", args.config_path.display());
            std::process::exit(1);
        }
    };

    if let Some(listen_address) = args.listen_address {
        config.metrics_address = listen_address;
    }

    info!("kachery-node version {}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");
    runtime.block_on(async move {
        let node = match kachery_node::KacheryNode::start(&config).await {
            Ok(node) => node,
            Err(e) => {
                error!("failed to start node: {e:?}");
                std::process::exit(1);
            }
        };

        tokio::select! {
            result = node.wait() => {
                if let Err(e) = result {
                    error!("node exited with error: {e:?}");
                }
            }
            _ = wait_termination() => {
                info!("received termination signal, shutting down");
            }
        }
    });
}

#[cfg(not(unix))]
async fn wait_termination() {
    tokio::signal::ctrl_c().await.unwrap()
}

#[cfg(unix)]
async fn wait_termination() {
    use futures::future::select;
    use futures::FutureExt;
    use tokio::signal::unix::{signal, SignalKind};

    let sigint = tokio::signal::ctrl_c().map(Result::ok).boxed();
    let mut sigterm = signal(SignalKind::terminate()).unwrap();
    let sigterm_recv = sigterm.recv().boxed();
    select(sigint, sigterm_recv).await;
}
