use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use kachery_download::{BucketLookup, BucketReader};
use kachery_feeds::{SubfeedBucketSource, SubfeedJson};
use kachery_types::{ChannelMembership, KacheryError, SignedSubfeedMessage};

use crate::layout;

/// GET/HEAD/PUT against bucket HTTPS endpoints via pre-signed or public
/// URLs. Resolves a channel's `gs://bucket/prefix` membership URI to an
/// object URL before every call; holds no other state.
pub struct BucketClient {
    http: reqwest::Client,
    bucket_uris: HashMap<String, String>,
}

impl BucketClient {
    pub fn new(memberships: &[ChannelMembership]) -> Self {
        let bucket_uris = memberships
            .iter()
            .map(|m| (m.channel_name.clone(), m.channel_bucket_uri.clone()))
            .collect();
        Self {
            http: reqwest::Client::new(),
            bucket_uris,
        }
    }

    fn object_url(&self, channel_name: &str, object_path: &str) -> Result<String, KacheryError> {
        let bucket_uri = self
            .bucket_uris
            .get(channel_name)
            .ok_or_else(|| KacheryError::not_found(format!("no bucket membership for channel {channel_name}")))?;
        let base = bucket_uri_to_url(bucket_uri)?;
        Ok(format!("{base}/{object_path}"))
    }

    pub async fn head(&self, url: &str) -> Result<bool, KacheryError> {
        let response = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|e| KacheryError::transient(e.to_string()))?;
        Ok(response.status().is_success())
    }

    pub async fn get_stream(&self, url: &str) -> Result<BucketReader, KacheryError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| KacheryError::transient(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(KacheryError::not_found(format!("bucket object at {url}")));
        }
        if !response.status().is_success() {
            return Err(KacheryError::transient(format!("GET {url} returned {}", response.status())));
        }
        let byte_stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let reader: Box<dyn AsyncRead + Unpin + Send> = Box::new(StreamReader::new(byte_stream));
        Ok(reader)
    }

    /// `null` on a 404; any other non-2xx status is `Transient`.
    pub async fn get_json(&self, url: &str, cache_bust: bool) -> Result<Option<serde_json::Value>, KacheryError> {
        let request = if cache_bust {
            let bust: u32 = rand::random();
            self.http.get(url).query(&[("_", bust.to_string())])
        } else {
            self.http.get(url)
        };
        let response = request.send().await.map_err(|e| KacheryError::transient(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(KacheryError::transient(format!("GET {url} returned {}", response.status())));
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| KacheryError::protocol(e.to_string()))
    }

    pub async fn put_signed(&self, url: &str, bytes: Vec<u8>) -> Result<(), KacheryError> {
        let response = self
            .http
            .put(url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| KacheryError::transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(KacheryError::transient(format!("PUT {url} returned {}", response.status())));
        }
        Ok(())
    }

    /// Direct object URLs, exposed for callers (such as a passthrough
    /// [`crate::SignedUrlMinter`]) that upload to the same layout this client
    /// reads from without going through a real signing service.
    pub fn file_object_url(&self, channel_name: &str, sha1: &str) -> Result<String, KacheryError> {
        self.object_url(channel_name, &layout::file_object_path(sha1))
    }

    pub fn subfeed_json_object_url(&self, channel_name: &str, feed_id: &str, subfeed_hash: &str) -> Result<String, KacheryError> {
        self.object_url(channel_name, &layout::subfeed_json_path(feed_id, subfeed_hash))
    }

    pub fn subfeed_message_object_url(
        &self,
        channel_name: &str,
        feed_id: &str,
        subfeed_hash: &str,
        message_number: u64,
    ) -> Result<String, KacheryError> {
        self.object_url(channel_name, &layout::subfeed_message_path(feed_id, subfeed_hash, message_number))
    }
}

/// `gs://bucket/prefix` -> `https://storage.googleapis.com/bucket/prefix`.
fn bucket_uri_to_url(bucket_uri: &str) -> Result<String, KacheryError> {
    let rest = bucket_uri
        .strip_prefix("gs://")
        .ok_or_else(|| KacheryError::protocol(format!("unsupported bucket uri scheme: {bucket_uri}")))?;
    Ok(format!("https://storage.googleapis.com/{rest}"))
}

#[async_trait]
impl BucketLookup for BucketClient {
    async fn head(&self, channel_name: &str, sha1: &str) -> Result<bool, KacheryError> {
        let url = self.object_url(channel_name, &layout::file_object_path(sha1))?;
        BucketClient::head(self, &url).await
    }

    async fn open_stream(&self, channel_name: &str, sha1: &str) -> Result<BucketReader, KacheryError> {
        let url = self.object_url(channel_name, &layout::file_object_path(sha1))?;
        self.get_stream(&url).await
    }
}

#[async_trait]
impl SubfeedBucketSource for BucketClient {
    async fn fetch_subfeed_json(
        &self,
        channel_name: &str,
        feed_id: &str,
        subfeed_hash: &str,
        cache_bust: bool,
    ) -> Result<Option<SubfeedJson>, KacheryError> {
        let url = self.object_url(channel_name, &layout::subfeed_json_path(feed_id, subfeed_hash))?;
        let Some(value) = self.get_json(&url, cache_bust).await? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| KacheryError::protocol(format!("malformed subfeed.json: {e}")))
    }

    async fn fetch_message(
        &self,
        channel_name: &str,
        feed_id: &str,
        subfeed_hash: &str,
        index: u64,
    ) -> Result<SignedSubfeedMessage, KacheryError> {
        let url = self.object_url(channel_name, &layout::subfeed_message_path(feed_id, subfeed_hash, index))?;
        let value = self
            .get_json(&url, false)
            .await?
            .ok_or_else(|| KacheryError::not_found(format!("subfeed message {index} at {url}")))?;
        serde_json::from_value(value).map_err(|e| KacheryError::protocol(format!("malformed subfeed message: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gs_uri_maps_to_storage_googleapis_url() {
        assert_eq!(
            bucket_uri_to_url("gs://my-bucket/some/prefix").unwrap(),
            "https://storage.googleapis.com/my-bucket/some/prefix"
        );
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(bucket_uri_to_url("s3://my-bucket/prefix").is_err());
    }

    #[test]
    fn object_url_joins_bucket_base_and_object_path() {
        let client = BucketClient::new(&[ChannelMembership {
            channel_name: "ch1".into(),
            channel_bucket_uri: "gs://bucket/prefix".into(),
            roles: Default::default(),
            authorization: Default::default(),
        }]);
        let url = client.object_url("ch1", &layout::file_object_path("abcdef01")).unwrap();
        assert_eq!(url, "https://storage.googleapis.com/bucket/prefix/sha1/ab/cd/ef/abcdef01");
    }

    #[test]
    fn unknown_channel_is_not_found() {
        let client = BucketClient::new(&[]);
        assert!(client.object_url("ch1", "sha1/x").is_err());
    }
}
