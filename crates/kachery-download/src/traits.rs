use async_trait::async_trait;
use tokio::io::AsyncRead;

use kachery_types::{FileKey, KacheryError};

/// A handle to an open bucket GET. Boxed and `Unpin` so the downloader never
/// needs to know which transport (reqwest, a test fixture) produced it.
pub type BucketReader = Box<dyn AsyncRead + Unpin + Send>;

/// The bucket-facing half of a download: existence probing and streaming GET,
/// scoped to a channel so the implementation can resolve `channelName` to a
/// bucket URI and sign requests as needed. Implemented by `kachery-network`'s
/// `BucketClient`; kept as a trait here so this crate never depends on the
/// pubsub/HTTP machinery that implementation needs.
#[async_trait]
pub trait BucketLookup: Send + Sync {
    async fn head(&self, channel_name: &str, sha1: &str) -> Result<bool, KacheryError>;

    async fn open_stream(&self, channel_name: &str, sha1: &str) -> Result<BucketReader, KacheryError>;
}

/// The pubsub-facing half: asks the rest of the channel to produce a file this
/// node doesn't have locally or in its bucket yet, and waits for the
/// `pending -> started -> finished` progression. Implemented by
/// `kachery-network`'s `HubCoordinator`, which owns the actual deadlines
/// (3s/30s/30s) and pubsub round trip; this trait only sees the outcome.
#[async_trait]
pub trait RemoteFileCoordinator: Send + Sync {
    async fn request_and_await_upload(&self, channel_name: &str, file_key: &FileKey) -> Result<(), KacheryError>;
}
