use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use kachery_types::{KacheryError, SignedSubfeedMessage};

use crate::store::SubfeedStore;

/// Caches one open [`SubfeedStore`] per `(feedId, subfeedHash)` so repeated
/// lookups don't reload and re-verify the chain from disk. This is the
/// `LocalFeedManager` collaborator HubCoordinator consumes.
pub struct LocalFeedManager {
    storage_dir: PathBuf,
    open_stores: Mutex<HashMap<(String, String), Arc<SubfeedStore>>>,
}

impl LocalFeedManager {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            open_stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub async fn open_subfeed(&self, feed_id: &str, subfeed_hash: &str) -> Result<Arc<SubfeedStore>, KacheryError> {
        let key = (feed_id.to_string(), subfeed_hash.to_string());
        let mut stores = self.open_stores.lock().await;
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone());
        }
        let store = Arc::new(SubfeedStore::open(&self.storage_dir, feed_id, subfeed_hash).await?);
        stores.insert(key, store.clone());
        Ok(store)
    }

    pub async fn get_signed_subfeed_messages(
        &self,
        feed_id: &str,
        subfeed_hash: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<SignedSubfeedMessage>, KacheryError> {
        let store = self.open_subfeed(feed_id, subfeed_hash).await?;
        Ok(store.get_signed_messages(start, end).await)
    }

    pub async fn get_num_messages(&self, feed_id: &str, subfeed_hash: &str) -> Result<u64, KacheryError> {
        let store = self.open_subfeed(feed_id, subfeed_hash).await?;
        Ok(store.get_num_messages().await)
    }

    /// Returns the number of messages actually appended (0 for a pure
    /// replay), so a caller with access to a `HubCoordinator` can tell
    /// whether this append is worth replicating to a bucket.
    pub async fn add_signed_messages_to_subfeed(
        &self,
        feed_id: &str,
        subfeed_hash: &str,
        msgs: Vec<SignedSubfeedMessage>,
    ) -> Result<u64, KacheryError> {
        let store = self.open_subfeed(feed_id, subfeed_hash).await?;
        store.add_signed_messages(msgs).await
    }
}

#[cfg(test)]
mod tests {
    use shared_crypto::{sign, Keypair};
    use tempfile::tempdir;

    use super::*;
    use kachery_types::SubfeedMessageBody;

    #[tokio::test]
    async fn repeated_open_returns_the_same_store() {
        let dir = tempdir().unwrap();
        let manager = LocalFeedManager::new(dir.path());
        let keypair = Keypair::generate();
        let feed_id = keypair.public_key_hex();

        let body = SubfeedMessageBody {
            message: serde_json::json!("hi"),
            message_number: 0,
            previous_signature: None,
            timestamp: 1_700_000_000.0,
        };
        let signature = sign(&body, &keypair).unwrap();
        let appended = manager
            .add_signed_messages_to_subfeed(&feed_id, "sf1", vec![SignedSubfeedMessage { body, signature }])
            .await
            .unwrap();
        assert_eq!(appended, 1);

        assert_eq!(manager.get_num_messages(&feed_id, "sf1").await.unwrap(), 1);
        let msgs = manager.get_signed_subfeed_messages(&feed_id, "sf1", 0, 10).await.unwrap();
        assert_eq!(msgs.len(), 1);
    }
}
