use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::warn;

use kachery_download::RemoteFileCoordinator;
use kachery_feeds::LocalFeedManager;
use kachery_storage::KacheryStorageManager;
use kachery_types::{
    ChannelCapability, ChannelMembership, FileKey, KacheryError, PubsubEnvelope, PubsubMessageBody, SignedSubfeedMessage,
    UploadFileStatusKind,
};
use shared_crypto::Keypair;

use crate::bucket_client::BucketClient;
use crate::signed_url::SignedUrlMinter;
use crate::transport::PubsubTransport;

const REQUEST_FILE_INITIAL_DEADLINE: Duration = Duration::from_secs(3);
const REQUEST_FILE_STAGE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    None,
    Pending,
    Started,
    Finished,
}

impl From<UploadFileStatusKind> for Stage {
    fn from(status: UploadFileStatusKind) -> Self {
        match status {
            UploadFileStatusKind::Pending => Stage::Pending,
            UploadFileStatusKind::Started => Stage::Started,
            UploadFileStatusKind::Finished => Stage::Finished,
        }
    }
}

struct Inner {
    node_id: String,
    keypair: Keypair,
    memberships: Vec<ChannelMembership>,
    transport: Arc<dyn PubsubTransport>,
    cas: KacheryStorageManager,
    bucket: Arc<BucketClient>,
    url_minter: Arc<dyn SignedUrlMinter>,
    feed_manager: Arc<LocalFeedManager>,
    file_waiters: Mutex<HashMap<String, watch::Sender<Stage>>>,
}

impl Inner {
    fn membership(&self, channel_name: &str) -> Result<&ChannelMembership, KacheryError> {
        self.memberships
            .iter()
            .find(|m| m.channel_name == channel_name)
            .ok_or_else(|| KacheryError::not_found(format!("no membership for channel {channel_name}")))
    }

    async fn publish(&self, pubsub_channel: &str, body: PubsubMessageBody) -> Result<(), KacheryError> {
        let signature = shared_crypto::sign(&body, &self.keypair)?;
        let envelope = PubsubEnvelope {
            body,
            from_node_id: self.node_id.clone(),
            signature,
        };
        self.transport.publish(pubsub_channel, envelope).await
    }

    async fn publish_upload_status(&self, channel_name: &str, file_key: FileKey, status: UploadFileStatusKind) -> Result<(), KacheryError> {
        self.publish(&format!("{channel_name}-provideFiles"), PubsubMessageBody::UploadFileStatus { file_key, status })
            .await
    }

    fn stage_watch(&self, sha1: &str) -> watch::Receiver<Stage> {
        let mut waiters = self.file_waiters.lock().unwrap();
        let sender = waiters.entry(sha1.to_string()).or_insert_with(|| watch::channel(Stage::None).0);
        sender.subscribe()
    }

    fn advance_stage(&self, sha1: &str, new_stage: Stage) {
        let mut waiters = self.file_waiters.lock().unwrap();
        let sender = waiters.entry(sha1.to_string()).or_insert_with(|| watch::channel(Stage::None).0);
        sender.send_if_modified(|cur| {
            if new_stage > *cur {
                *cur = new_stage;
                true
            } else {
                false
            }
        });
    }
}

/// Per-channel pubsub listener plus incoming-request router and, via
/// [`RemoteFileCoordinator`], the outgoing `requestFile` waiter used by
/// `kachery-download`'s direct load path. One instance is node-scoped and
/// cloned wherever a collaborator needs it, the way `state_sync::Handle` is
/// shared across the reference node.
#[derive(Clone)]
pub struct HubCoordinator {
    inner: Arc<Inner>,
}

impl HubCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        keypair: Keypair,
        memberships: Vec<ChannelMembership>,
        transport: Arc<dyn PubsubTransport>,
        cas: KacheryStorageManager,
        bucket: Arc<BucketClient>,
        url_minter: Arc<dyn SignedUrlMinter>,
        feed_manager: Arc<LocalFeedManager>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                node_id: node_id.into(),
                keypair,
                memberships,
                transport,
                cas,
                bucket,
                url_minter,
                feed_manager,
                file_waiters: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribes to every pubsub sub-channel implied by this node's
    /// role x permission memberships and spawns one routing task per
    /// subscription.
    pub async fn start(&self) -> Result<(), KacheryError> {
        let memberships = self.inner.memberships.clone();
        for membership in &memberships {
            if membership.is_enabled(ChannelCapability::RequestFiles) {
                self.spawn_listener(membership.pubsub_channel_name("provideFiles"), membership.channel_name.clone())
                    .await?;
            }
            if membership.is_enabled(ChannelCapability::ProvideFiles) {
                self.spawn_listener(membership.pubsub_channel_name("requestFiles"), membership.channel_name.clone())
                    .await?;
            }
            if membership.is_enabled(ChannelCapability::RequestFeeds) {
                self.spawn_listener(membership.pubsub_channel_name("provideFeeds"), membership.channel_name.clone())
                    .await?;
            }
            if membership.is_enabled(ChannelCapability::ProvideFeeds) {
                self.spawn_listener(membership.pubsub_channel_name("requestFeeds"), membership.channel_name.clone())
                    .await?;
            }
        }
        Ok(())
    }

    /// Appends `msgs` to the local subfeed and, when this node holds
    /// `provideFeeds` for `channel_name`, replicates the updated subfeed to
    /// the bucket and publishes the resulting message count — the
    /// local-append trigger for bucket replication, the producer-side
    /// counterpart to `provide_subfeed`'s reactive path off an incoming
    /// `requestSubfeed`.
    pub async fn append_subfeed_messages(
        &self,
        channel_name: &str,
        feed_id: &str,
        subfeed_hash: &str,
        msgs: Vec<SignedSubfeedMessage>,
    ) -> Result<(), KacheryError> {
        let appended = self.inner.feed_manager.add_signed_messages_to_subfeed(feed_id, subfeed_hash, msgs).await?;
        if appended > 0 {
            provide_subfeed(&self.inner, channel_name, feed_id, subfeed_hash).await?;
        }
        Ok(())
    }

    async fn spawn_listener(&self, pubsub_channel: String, channel_name: String) -> Result<(), KacheryError> {
        let mut receiver = self.inner.transport.subscribe(&pubsub_channel).await?;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                route_incoming(inner.clone(), channel_name.clone(), pubsub_channel.clone(), envelope).await;
            }
        });
        Ok(())
    }
}

async fn route_incoming(inner: Arc<Inner>, channel_name: String, pubsub_channel: String, envelope: PubsubEnvelope) {
    if !shared_crypto::verify(&envelope.body, &envelope.from_node_id, &envelope.signature) {
        warn!(channel = %pubsub_channel, from = %envelope.from_node_id, "dropping pubsub message with invalid signature");
        return;
    }

    match envelope.body {
        PubsubMessageBody::RequestFile { file_key } if pubsub_channel.ends_with("-requestFiles") => {
            tokio::spawn(async move {
                if let Err(err) = provide_file(&inner, &channel_name, &file_key).await {
                    warn!(%channel_name, ?err, "failed to service incoming file request");
                }
            });
        }
        PubsubMessageBody::UploadFileStatus { file_key, status } if pubsub_channel.ends_with("-provideFiles") => {
            if let Some(sha1) = &file_key.sha1 {
                inner.advance_stage(sha1, Stage::from(status));
            }
        }
        PubsubMessageBody::RequestSubfeed { feed_id, subfeed_hash, .. } if pubsub_channel.ends_with("-requestFeeds") => {
            tokio::spawn(async move {
                if let Err(err) = provide_subfeed(&inner, &channel_name, &feed_id, &subfeed_hash).await {
                    warn!(%channel_name, %feed_id, ?err, "failed to service incoming subfeed request");
                }
            });
        }
        PubsubMessageBody::SubfeedMessageCountUpdate { feed_id, subfeed_hash, message_count } if pubsub_channel.ends_with("-provideFeeds") => {
            tokio::spawn(async move {
                if let Err(err) =
                    kachery_feeds::sync_subfeed_from_bucket(&inner.feed_manager, inner.bucket.as_ref(), &channel_name, &feed_id, &subfeed_hash, message_count)
                        .await
                {
                    warn!(%channel_name, %feed_id, ?err, "failed to sync subfeed from bucket");
                }
            });
        }
        other => {
            warn!(channel = %pubsub_channel, body = ?other, "dropping message body that does not belong on this sub-channel");
        }
    }
}

async fn provide_file(inner: &Inner, channel_name: &str, file_key: &FileKey) -> Result<(), KacheryError> {
    let membership = inner.membership(channel_name)?;
    if !membership.is_enabled(ChannelCapability::ProvideFiles) {
        return Ok(());
    }
    let found = inner.cas.find_file(file_key).await?;
    if !found.found {
        return Ok(());
    }
    let sha1 = file_key
        .sha1
        .clone()
        .ok_or_else(|| KacheryError::protocol("file key has no sha1"))?;
    let path = found
        .local_path
        .ok_or_else(|| KacheryError::protocol("resolved file has no local path"))?;

    inner
        .publish_upload_status(channel_name, file_key.clone(), UploadFileStatusKind::Started)
        .await?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| KacheryError::io(&path, &e))?;
    let url = inner
        .url_minter
        .mint_file_upload_url(channel_name, &sha1, bytes.len() as u64)
        .await?;
    inner.bucket.put_signed(&url, bytes).await?;

    inner
        .publish_upload_status(channel_name, file_key.clone(), UploadFileStatusKind::Finished)
        .await
}

async fn provide_subfeed(inner: &Inner, channel_name: &str, feed_id: &str, subfeed_hash: &str) -> Result<(), KacheryError> {
    let membership = inner.membership(channel_name)?;
    if !membership.is_enabled(ChannelCapability::ProvideFeeds) {
        return Ok(());
    }
    let count = inner.feed_manager.get_num_messages(feed_id, subfeed_hash).await?;
    let messages = inner
        .feed_manager
        .get_signed_subfeed_messages(feed_id, subfeed_hash, 0, count)
        .await?;
    for (index, message) in messages.iter().enumerate() {
        let url = inner
            .url_minter
            .mint_subfeed_message_upload_url(channel_name, feed_id, subfeed_hash, index as u64)
            .await?;
        let bytes = serde_json::to_vec(message).map_err(|e| KacheryError::protocol(e.to_string()))?;
        inner.bucket.put_signed(&url, bytes).await?;
    }
    let json_url = inner
        .url_minter
        .mint_subfeed_json_upload_url(channel_name, feed_id, subfeed_hash)
        .await?;
    let json_bytes =
        serde_json::to_vec(&serde_json::json!({ "messageCount": count })).map_err(|e| KacheryError::protocol(e.to_string()))?;
    inner.bucket.put_signed(&json_url, json_bytes).await?;

    inner
        .publish(
            &format!("{channel_name}-provideFeeds"),
            PubsubMessageBody::SubfeedMessageCountUpdate {
                feed_id: feed_id.to_string(),
                subfeed_hash: subfeed_hash.to_string(),
                message_count: count,
            },
        )
        .await
}

/// Outgoing state machine for the `requestFile` waiter: monotonic stage
/// progression with a 3s deadline to leave `None` and a 30s deadline at each
/// subsequent stage; each advance resets the deadline timer.
#[async_trait]
impl RemoteFileCoordinator for HubCoordinator {
    async fn request_and_await_upload(&self, channel_name: &str, file_key: &FileKey) -> Result<(), KacheryError> {
        let sha1 = file_key
            .sha1
            .clone()
            .ok_or_else(|| KacheryError::protocol("file key has no sha1"))?;

        self.inner
            .publish(
                &format!("{channel_name}-requestFiles"),
                PubsubMessageBody::RequestFile { file_key: file_key.clone() },
            )
            .await?;

        let mut receiver = self.inner.stage_watch(&sha1);
        let mut stage = *receiver.borrow();
        loop {
            if stage == Stage::Finished {
                return Ok(());
            }
            let deadline = match stage {
                Stage::None => REQUEST_FILE_INITIAL_DEADLINE,
                Stage::Pending | Stage::Started => REQUEST_FILE_STAGE_DEADLINE,
                Stage::Finished => unreachable!(),
            };
            match tokio::time::timeout(deadline, receiver.changed()).await {
                Ok(Ok(())) => stage = *receiver.borrow(),
                _ => return Err(KacheryError::not_found("Unable to find file")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use tokio::sync::mpsc;
    use tokio::sync::Mutex as AsyncMutex;

    use kachery_types::{ChannelAuthorization, ChannelRoles};
    use tempfile::tempdir;

    use super::*;

    struct LoopbackTransport {
        channels: AsyncMutex<StdHashMap<String, mpsc::Sender<PubsubEnvelope>>>,
    }

    impl LoopbackTransport {
        fn new() -> Self {
            Self { channels: AsyncMutex::new(StdHashMap::new()) }
        }
    }

    #[async_trait]
    impl PubsubTransport for LoopbackTransport {
        async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<PubsubEnvelope>, KacheryError> {
            let (tx, rx) = mpsc::channel(16);
            self.channels.lock().await.insert(channel.to_string(), tx);
            Ok(rx)
        }

        async fn publish(&self, channel: &str, envelope: PubsubEnvelope) -> Result<(), KacheryError> {
            if let Some(sender) = self.channels.lock().await.get(channel) {
                let _ = sender.send(envelope).await;
            }
            Ok(())
        }
    }

    struct NoopMinter;

    #[async_trait]
    impl SignedUrlMinter for NoopMinter {
        async fn mint_file_upload_url(&self, _channel_name: &str, _sha1: &str, _size: u64) -> Result<String, KacheryError> {
            Ok("https://example.invalid/upload".to_string())
        }
        async fn mint_subfeed_message_upload_url(&self, _c: &str, _f: &str, _s: &str, _n: u64) -> Result<String, KacheryError> {
            Ok("https://example.invalid/upload".to_string())
        }
        async fn mint_subfeed_json_upload_url(&self, _c: &str, _f: &str, _s: &str) -> Result<String, KacheryError> {
            Ok("https://example.invalid/upload".to_string())
        }
    }

    struct FailingMinter;

    #[async_trait]
    impl SignedUrlMinter for FailingMinter {
        async fn mint_file_upload_url(&self, _channel_name: &str, _sha1: &str, _size: u64) -> Result<String, KacheryError> {
            Err(KacheryError::transient("no minting service in this test"))
        }
        async fn mint_subfeed_message_upload_url(&self, _c: &str, _f: &str, _s: &str, _n: u64) -> Result<String, KacheryError> {
            Err(KacheryError::transient("no minting service in this test"))
        }
        async fn mint_subfeed_json_upload_url(&self, _c: &str, _f: &str, _s: &str) -> Result<String, KacheryError> {
            Err(KacheryError::transient("no minting service in this test"))
        }
    }

    fn membership_with_provide_feeds(channel_name: &str, provide_feeds: bool) -> ChannelMembership {
        ChannelMembership {
            channel_name: channel_name.to_string(),
            channel_bucket_uri: "gs://bucket/prefix".to_string(),
            roles: ChannelRoles {
                request_files: true,
                provide_files: true,
                request_feeds: true,
                provide_feeds,
            },
            authorization: ChannelAuthorization {
                permissions: ChannelRoles {
                    request_files: true,
                    provide_files: true,
                    request_feeds: true,
                    provide_feeds,
                },
            },
        }
    }

    fn membership(channel_name: &str) -> ChannelMembership {
        membership_with_provide_feeds(channel_name, true)
    }

    fn sample_subfeed_message(keypair: &Keypair) -> SignedSubfeedMessage {
        let body = kachery_types::SubfeedMessageBody {
            message: serde_json::json!("hi"),
            message_number: 0,
            previous_signature: None,
            timestamp: 1_700_000_000.0,
        };
        let signature = shared_crypto::sign(&body, keypair).unwrap();
        SignedSubfeedMessage { body, signature }
    }

    fn coordinator() -> HubCoordinator {
        let dir = tempdir().unwrap();
        let feed_dir = tempdir().unwrap();
        HubCoordinator::new(
            Keypair::generate().public_key_hex(),
            Keypair::generate(),
            vec![membership("ch1")],
            Arc::new(LoopbackTransport::new()),
            KacheryStorageManager::new(dir.path()),
            Arc::new(BucketClient::new(&[membership("ch1")])),
            Arc::new(NoopMinter),
            Arc::new(LocalFeedManager::new(feed_dir.path())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn e6_full_progression_resolves_before_deadline() {
        let hub = coordinator();
        hub.start().await.unwrap();
        let file_key = FileKey::from_sha1("a".repeat(40));

        let inner = hub.inner.clone();
        let sha1 = file_key.sha1.clone().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(0)).await;
            inner.advance_stage(&sha1, Stage::Pending);
            tokio::time::sleep(Duration::from_secs(2)).await;
            inner.advance_stage(&sha1, Stage::Started);
            tokio::time::sleep(Duration::from_secs(3)).await;
            inner.advance_stage(&sha1, Stage::Finished);
        });

        hub.request_and_await_upload("ch1", &file_key).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn e6_pending_only_times_out_around_33s() {
        let hub = coordinator();
        hub.start().await.unwrap();
        let file_key = FileKey::from_sha1("b".repeat(40));

        let inner = hub.inner.clone();
        let sha1 = file_key.sha1.clone().unwrap();
        tokio::spawn(async move {
            inner.advance_stage(&sha1, Stage::Pending);
        });

        let start = tokio::time::Instant::now();
        let result = hub.request_and_await_upload("ch1", &file_key).await;
        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(35));
    }

    #[test]
    fn stage_never_regresses() {
        let dir = tempdir().unwrap();
        let feed_dir = tempdir().unwrap();
        let hub = HubCoordinator::new(
            "node",
            Keypair::generate(),
            vec![membership("ch1")],
            Arc::new(LoopbackTransport::new()),
            KacheryStorageManager::new(dir.path()),
            Arc::new(BucketClient::new(&[membership("ch1")])),
            Arc::new(NoopMinter),
            Arc::new(LocalFeedManager::new(feed_dir.path())),
        );
        hub.inner.advance_stage("sha1", Stage::Started);
        hub.inner.advance_stage("sha1", Stage::Pending);
        assert_eq!(*hub.inner.stage_watch("sha1").borrow(), Stage::Started);
    }

    #[tokio::test]
    async fn local_append_without_provide_feeds_skips_replication() {
        let dir = tempdir().unwrap();
        let feed_dir = tempdir().unwrap();
        let membership = membership_with_provide_feeds("ch1", false);
        let hub = HubCoordinator::new(
            "node",
            Keypair::generate(),
            vec![membership.clone()],
            Arc::new(LoopbackTransport::new()),
            KacheryStorageManager::new(dir.path()),
            Arc::new(BucketClient::new(&[membership])),
            Arc::new(FailingMinter),
            Arc::new(LocalFeedManager::new(feed_dir.path())),
        );
        let keypair = Keypair::generate();
        let feed_id = keypair.public_key_hex();
        let msg = sample_subfeed_message(&keypair);

        // Would fail if replication were attempted, since FailingMinter
        // always errors; succeeding proves the permission gate skipped it.
        hub.append_subfeed_messages("ch1", &feed_id, "sf1", vec![msg]).await.unwrap();
    }

    #[tokio::test]
    async fn local_append_with_provide_feeds_attempts_bucket_replication() {
        let dir = tempdir().unwrap();
        let feed_dir = tempdir().unwrap();
        let membership = membership_with_provide_feeds("ch1", true);
        let hub = HubCoordinator::new(
            "node",
            Keypair::generate(),
            vec![membership.clone()],
            Arc::new(LoopbackTransport::new()),
            KacheryStorageManager::new(dir.path()),
            Arc::new(BucketClient::new(&[membership])),
            Arc::new(FailingMinter),
            Arc::new(LocalFeedManager::new(feed_dir.path())),
        );
        let keypair = Keypair::generate();
        let feed_id = keypair.public_key_hex();
        let msg = sample_subfeed_message(&keypair);

        let err = hub.append_subfeed_messages("ch1", &feed_id, "sf1", vec![msg]).await.unwrap_err();
        assert!(matches!(err, KacheryError::Transient { .. }));
    }

    #[tokio::test]
    async fn replaying_an_append_does_not_retrigger_replication() {
        let dir = tempdir().unwrap();
        let feed_dir = tempdir().unwrap();
        let membership = membership_with_provide_feeds("ch1", true);
        let hub = HubCoordinator::new(
            "node",
            Keypair::generate(),
            vec![membership.clone()],
            Arc::new(LoopbackTransport::new()),
            KacheryStorageManager::new(dir.path()),
            Arc::new(BucketClient::new(&[membership])),
            Arc::new(FailingMinter),
            Arc::new(LocalFeedManager::new(feed_dir.path())),
        );
        let keypair = Keypair::generate();
        let feed_id = keypair.public_key_hex();
        let msg = sample_subfeed_message(&keypair);

        hub.append_subfeed_messages("ch1", &feed_id, "sf1", vec![msg.clone()]).await.unwrap_err();
        // The message is already durable from the first call; replaying it
        // appends nothing, so this second call skips replication entirely.
        hub.append_subfeed_messages("ch1", &feed_id, "sf1", vec![msg]).await.unwrap();
    }
}
