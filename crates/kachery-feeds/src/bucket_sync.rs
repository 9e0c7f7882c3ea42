use async_trait::async_trait;

use kachery_types::{KacheryError, SignedSubfeedMessage};

use crate::manager::LocalFeedManager;

/// `subfeed.json`'s contents: `{"messageCount": n}`.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct SubfeedJson {
    #[serde(rename = "messageCount")]
    pub message_count: u64,
}

/// The bucket-facing half of subfeed replication, consumer side. Implemented
/// by `kachery-network`'s `BucketClient`; kept as a trait here so this crate
/// never depends on the HTTP/signed-URL machinery that implementation needs.
#[async_trait]
pub trait SubfeedBucketSource: Send + Sync {
    async fn fetch_subfeed_json(
        &self,
        channel_name: &str,
        feed_id: &str,
        subfeed_hash: &str,
        cache_bust: bool,
    ) -> Result<Option<SubfeedJson>, KacheryError>;

    async fn fetch_message(
        &self,
        channel_name: &str,
        feed_id: &str,
        subfeed_hash: &str,
        index: u64,
    ) -> Result<SignedSubfeedMessage, KacheryError>;
}

/// Driven by a `subfeedMessageCountUpdate` notification: if the reported
/// count exceeds what's stored locally, re-confirms against `subfeed.json`
/// (cache-busted, since the bucket may be eventually consistent), fetches
/// the new messages one by one, and lets `SubfeedStore::add_signed_messages`
/// verify and persist them as one batch.
pub async fn sync_subfeed_from_bucket(
    manager: &LocalFeedManager,
    source: &dyn SubfeedBucketSource,
    channel_name: &str,
    feed_id: &str,
    subfeed_hash: &str,
    reported_count: u64,
) -> Result<(), KacheryError> {
    let local_count = manager.get_num_messages(feed_id, subfeed_hash).await?;
    if reported_count <= local_count {
        return Ok(());
    }

    let confirmed = source
        .fetch_subfeed_json(channel_name, feed_id, subfeed_hash, true)
        .await?
        .ok_or_else(|| KacheryError::not_found(format!("subfeed.json for {feed_id}/{subfeed_hash}")))?;
    if confirmed.message_count <= local_count {
        return Ok(());
    }

    let mut new_messages = Vec::new();
    for index in local_count..confirmed.message_count {
        new_messages.push(source.fetch_message(channel_name, feed_id, subfeed_hash, index).await?);
    }
    manager.add_signed_messages_to_subfeed(feed_id, subfeed_hash, new_messages).await?;
    Ok(())
}
