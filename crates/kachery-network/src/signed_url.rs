use async_trait::async_trait;

use kachery_types::KacheryError;

/// Mints pre-signed bucket URLs for the file-provider and subfeed-provider
/// jobs. Like `PubsubTransport`, the minting service itself (cloud IAM,
/// expiry policy) is a named external collaborator; `HubCoordinator` only
/// needs the URL back.
#[async_trait]
pub trait SignedUrlMinter: Send + Sync {
    async fn mint_file_upload_url(&self, channel_name: &str, sha1: &str, size: u64) -> Result<String, KacheryError>;

    async fn mint_subfeed_message_upload_url(
        &self,
        channel_name: &str,
        feed_id: &str,
        subfeed_hash: &str,
        message_number: u64,
    ) -> Result<String, KacheryError>;

    async fn mint_subfeed_json_upload_url(
        &self,
        channel_name: &str,
        feed_id: &str,
        subfeed_hash: &str,
    ) -> Result<String, KacheryError>;
}
