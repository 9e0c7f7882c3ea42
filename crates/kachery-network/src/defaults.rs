// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use kachery_types::{KacheryError, PubsubEnvelope};

use crate::bucket_client::BucketClient;
use crate::signed_url::SignedUrlMinter;
use crate::transport::PubsubTransport;

/// An in-memory [`PubsubTransport`] that fans a publish out to every
/// subscriber registered in the same process. Stands in for the real
/// pubsub backend (registration, auth, wire framing) on a single-node
/// deployment or in a smoke test; a multi-node deployment injects its own
/// transport into [`kachery_network::HubCoordinator::new`] instead.
#[derive(Default)]
pub struct InProcessPubsubTransport {
    channels: Mutex<HashMap<String, Vec<mpsc::Sender<PubsubEnvelope>>>>,
}

impl InProcessPubsubTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubsubTransport for InProcessPubsubTransport {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<PubsubEnvelope>, KacheryError> {
        let (tx, rx) = mpsc::channel(64);
        self.channels.lock().await.entry(channel.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn publish(&self, channel: &str, envelope: PubsubEnvelope) -> Result<(), KacheryError> {
        let subscribers = self.channels.lock().await.get(channel).cloned().unwrap_or_default();
        for sender in subscribers {
            let _ = sender.send(envelope.clone()).await;
        }
        Ok(())
    }
}

/// A [`SignedUrlMinter`] that hands back the bucket's own object URL
/// unsigned. Only correct against a bucket configured for public writes;
/// a deployment backed by a real cloud IAM signing service injects its own
/// minter instead.
pub struct PassthroughUrlMinter {
    bucket: Arc<BucketClient>,
}

impl PassthroughUrlMinter {
    pub fn new(bucket: Arc<BucketClient>) -> Self {
        Self { bucket }
    }
}

#[async_trait]
impl SignedUrlMinter for PassthroughUrlMinter {
    async fn mint_file_upload_url(&self, channel_name: &str, sha1: &str, _size: u64) -> Result<String, KacheryError> {
        self.bucket.file_object_url(channel_name, sha1)
    }

    async fn mint_subfeed_message_upload_url(
        &self,
        channel_name: &str,
        feed_id: &str,
        subfeed_hash: &str,
        message_number: u64,
    ) -> Result<String, KacheryError> {
        self.bucket
            .subfeed_message_object_url(channel_name, feed_id, subfeed_hash, message_number)
    }

    async fn mint_subfeed_json_upload_url(&self, channel_name: &str, feed_id: &str, subfeed_hash: &str) -> Result<String, KacheryError> {
        self.bucket.subfeed_json_object_url(channel_name, feed_id, subfeed_hash)
    }
}

#[cfg(test)]
mod tests {
    use kachery_types::{ChannelMembership, FileKey, PubsubMessageBody};

    use super::*;

    #[tokio::test]
    async fn published_envelope_reaches_every_subscriber() {
        let transport = InProcessPubsubTransport::new();
        let mut a = transport.subscribe("ch1-requestFiles").await.unwrap();
        let mut b = transport.subscribe("ch1-requestFiles").await.unwrap();
        let envelope = PubsubEnvelope {
            body: PubsubMessageBody::RequestFile {
                file_key: FileKey::from_sha1("a".repeat(40)),
            },
            from_node_id: "node1".into(),
            signature: "sig".into(),
        };
        transport.publish("ch1-requestFiles", envelope.clone()).await.unwrap();
        assert_eq!(a.recv().await.unwrap().from_node_id, "node1");
        assert_eq!(b.recv().await.unwrap().from_node_id, "node1");
    }

    #[tokio::test]
    async fn passthrough_minter_returns_the_bucket_object_url() {
        let bucket = Arc::new(BucketClient::new(&[ChannelMembership {
            channel_name: "ch1".into(),
            channel_bucket_uri: "gs://bucket/prefix".into(),
            roles: Default::default(),
            authorization: Default::default(),
        }]));
        let minter = PassthroughUrlMinter::new(bucket);
        let url = minter.mint_file_upload_url("ch1", "abcdef01", 10).await.unwrap();
        assert_eq!(url, "https://storage.googleapis.com/bucket/prefix/sha1/ab/cd/ef/abcdef01");
    }
}
