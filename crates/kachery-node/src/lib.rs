// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wires storage, download, feeds and network into one running daemon
//! process, the same role `sui-node`'s `SuiNode` plays for the reference
//! workspace.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use kachery_config::NodeConfig;
use kachery_download::Downloader;
use kachery_feeds::LocalFeedManager;
use kachery_network::{BucketClient, HubCoordinator, InProcessPubsubTransport, PassthroughUrlMinter};
use kachery_storage::KacheryStorageManager;
use shared_crypto::Keypair;

/// Reads a 32-byte Ed25519 seed from `path`, generating and persisting one on
/// first run. A production deployment with a real key-management story
/// injects its own keypair instead of relying on this convenience.
fn load_or_generate_keypair(path: &std::path::Path) -> Result<Keypair> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let seed: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("keypair file at {} is not 32 bytes", path.display()))?;
            Ok(Keypair::from_bytes(seed))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let keypair = Keypair::generate();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(path, keypair.to_bytes()).with_context(|| format!("writing new keypair to {}", path.display()))?;
            info!(path = %path.display(), "generated new node keypair");
            Ok(keypair)
        }
        Err(e) => Err(e).with_context(|| format!("reading keypair at {}", path.display())),
    }
}

/// A running daemon: the content-addressed store, the chunked downloader,
/// the local feed manager, and the hub that routes pubsub traffic between
/// them and the rest of a channel's membership.
pub struct KacheryNode {
    node_id: String,
    downloader: Arc<Downloader>,
    feed_manager: Arc<LocalFeedManager>,
    hub: HubCoordinator,
}

impl KacheryNode {
    pub async fn start(config: &NodeConfig) -> Result<Self> {
        let keypair = load_or_generate_keypair(&config.node_keypair_path)?;
        let node_id = keypair.public_key_hex();
        info!(node_id = %node_id, storage_dir = %config.storage_dir.display(), "starting kachery node");

        let cas = KacheryStorageManager::new(&config.storage_dir);
        let feed_manager = Arc::new(LocalFeedManager::new(config.storage_dir.join("feeds")));
        let bucket = Arc::new(BucketClient::new(&config.channels));
        let transport = Arc::new(InProcessPubsubTransport::new());
        let url_minter = Arc::new(PassthroughUrlMinter::new(bucket.clone()));

        let hub = HubCoordinator::new(
            node_id.clone(),
            keypair,
            config.channels.clone(),
            transport,
            cas.clone(),
            bucket.clone(),
            url_minter,
            feed_manager.clone(),
        );
        hub.start().await.context("starting pubsub listeners")?;

        let downloader = Arc::new(Downloader::new(cas, bucket, Arc::new(hub.clone())));

        info!(node_id = %node_id, channels = config.channels.len(), "kachery node started");

        Ok(Self { node_id, downloader, feed_manager, hub })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    pub fn feed_manager(&self) -> &Arc<LocalFeedManager> {
        &self.feed_manager
    }

    pub fn hub(&self) -> &HubCoordinator {
        &self.hub
    }

    /// The daemon has no foreground future of its own: `HubCoordinator::start`
    /// already spawned its listener tasks, so the process runs until the
    /// caller's own termination signal fires. Mirrors `SuiNode::wait` in
    /// shape even though there is no server join handle to await here.
    pub async fn wait(self) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn sample_config(storage_dir: &std::path::Path) -> NodeConfig {
        NodeConfig {
            storage_dir: storage_dir.to_path_buf(),
            channels: Vec::new(),
            node_keypair_path: storage_dir.join("node.key"),
            metrics_address: "127.0.0.1:9184".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn start_generates_a_keypair_on_first_run() {
        let dir = tempdir().unwrap();
        let config = sample_config(dir.path());
        let node = KacheryNode::start(&config).await.unwrap();
        assert_eq!(node.node_id().len(), 64);
        assert!(config.node_keypair_path.exists());
    }

    #[tokio::test]
    async fn start_reuses_an_existing_keypair() {
        let dir = tempdir().unwrap();
        let config = sample_config(dir.path());
        let first = KacheryNode::start(&config).await.unwrap();
        let second = KacheryNode::start(&config).await.unwrap();
        assert_eq!(first.node_id(), second.node_id());
    }
}
