use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use kachery_storage::{FindFileResult, KacheryStorageManager};
use kachery_types::{DataStream, DataStreamProducer, FileKey, FileManifest, KacheryError};

use crate::traits::{BucketLookup, RemoteFileCoordinator};

const MANIFEST_FAN_OUT: usize = 5;
const MAX_CHUNK_RETRIES: u32 = 2;

/// Resolves a `FileKey` into local bytes: a CAS hit short-circuits
/// everything else; a miss falls through to a direct bucket fetch or, for a
/// manifested file, a bounded-concurrency chunk fetch followed by
/// reassembly. Mirrors the CAS's own handle-is-cheap-to-clone shape.
#[derive(Clone)]
pub struct Downloader {
    cas: KacheryStorageManager,
    bucket: Arc<dyn BucketLookup>,
    coordinator: Arc<dyn RemoteFileCoordinator>,
}

impl Downloader {
    pub fn new(
        cas: KacheryStorageManager,
        bucket: Arc<dyn BucketLookup>,
        coordinator: Arc<dyn RemoteFileCoordinator>,
    ) -> Self {
        Self { cas, bucket, coordinator }
    }

    /// Convenience wrapper: drives a [`Self::load_file`] stream to
    /// completion and re-resolves the file locally, so the caller gets a
    /// path without having to know whether the file was already present.
    pub async fn load_file_async(
        &self,
        file_key: &FileKey,
        channel_name: Option<&str>,
        label: &str,
    ) -> Result<FindFileResult, KacheryError> {
        let found = self.cas.find_file(file_key).await?;
        if found.found {
            return Ok(found);
        }
        let mut stream = self.load_file(file_key.clone(), channel_name.map(String::from), label.to_string());
        stream.run_to_completion().await?;
        self.cas.find_file(file_key).await
    }

    /// Returns a hot [`DataStream`]; an already-satisfied key ends the
    /// stream immediately with `Finished { size: 0 }` and callers re-query
    /// `findFile` to get the path, matching the CAS's own empty-stream
    /// shortcut.
    pub fn load_file(&self, file_key: FileKey, channel_name: Option<String>, label: String) -> DataStream {
        let (stream, producer) = DataStreamProducer::new_pair();
        let downloader = self.clone();
        tokio::spawn(async move {
            match downloader.run(&file_key, channel_name.as_deref(), &label, Some(&producer)).await {
                Ok(size) => producer.finish(size).await,
                Err(err) => producer.fail(err).await,
            }
        });
        stream
    }

    async fn run(
        &self,
        file_key: &FileKey,
        channel_name: Option<&str>,
        label: &str,
        producer: Option<&DataStreamProducer>,
    ) -> Result<u64, KacheryError> {
        let found = self.cas.find_file(file_key).await?;
        if found.found {
            return Ok(found.size);
        }
        if file_key.has_manifest() {
            self.manifest_driven_load(file_key, channel_name, label, producer).await
        } else {
            self.direct_load(file_key, channel_name, label, producer).await
        }
    }

    /// Two HEAD-probe passes over the channel's bucket, with a
    /// `requestFile` round trip through the coordinator between them. Fails
    /// with `NotFound` once both passes come up empty.
    async fn direct_load(
        &self,
        file_key: &FileKey,
        channel_name: Option<&str>,
        label: &str,
        producer: Option<&DataStreamProducer>,
    ) -> Result<u64, KacheryError> {
        let channel_name = channel_name
            .ok_or_else(|| KacheryError::protocol("direct load requires a channel name"))?;
        let sha1 = file_key
            .sha1
            .as_deref()
            .ok_or_else(|| KacheryError::protocol("file key has no sha1 to fetch"))?;

        for pass in 0..2 {
            if self.bucket.head(channel_name, sha1).await? {
                debug!(label, sha1, pass, "bucket hit, streaming into CAS");
                let reader = self.bucket.open_stream(channel_name, sha1).await?;
                let mut download = self.cas.store_file_from_bucket_download(reader, sha1.to_string());
                return relay_to_completion(&mut download, producer).await;
            }
            if pass == 0 {
                self.coordinator.request_and_await_upload(channel_name, file_key).await?;
            }
        }
        Err(KacheryError::not_found(format!("{label}: unable to find file {sha1}")))
    }

    /// Loads the manifest itself (recursively, via `loadFile`), validates
    /// it, fans chunk loads out over a bounded concurrency, and reassembles
    /// once every chunk is locally present.
    async fn manifest_driven_load(
        &self,
        file_key: &FileKey,
        channel_name: Option<&str>,
        label: &str,
        producer: Option<&DataStreamProducer>,
    ) -> Result<u64, KacheryError> {
        let manifest_sha1 = file_key
            .manifest_sha1
            .clone()
            .ok_or_else(|| KacheryError::protocol("manifest-driven load requires manifestSha1"))?;
        let manifest_key = FileKey::from_sha1(manifest_sha1.clone());
        let manifest_found = self.load_file_async(&manifest_key, channel_name, label).await?;
        let manifest_path = manifest_found
            .local_path
            .ok_or_else(|| KacheryError::protocol("manifest resolved without a local path"))?;
        let manifest_bytes = tokio::fs::read(&manifest_path)
            .await
            .map_err(|e| KacheryError::io(&manifest_path, &e))?;
        let manifest: FileManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| KacheryError::protocol(format!("malformed manifest: {e}")))?;
        manifest.validate()?;
        if let Some(outer_sha1) = &file_key.sha1 {
            if outer_sha1 != &manifest.sha1 {
                return Err(KacheryError::hash_mismatch(outer_sha1, &manifest.sha1));
            }
        }

        let aborted = Arc::new(AtomicBool::new(false));
        let results: Vec<Result<(), KacheryError>> = stream::iter(manifest.chunks.iter().cloned().map(|chunk| {
            let downloader = self.clone();
            let parent = FileKey::from_sha1(manifest.sha1.clone());
            let channel_name = channel_name.map(String::from);
            let label = label.to_string();
            let aborted = aborted.clone();
            async move {
                if aborted.load(Ordering::SeqCst) {
                    return Err(KacheryError::Cancelled);
                }
                let chunk_key = FileKey::chunk(chunk.sha1.clone(), parent, chunk.start, chunk.end);
                let mut backoff_policy = backoff::ExponentialBackoff {
                    initial_interval: Duration::from_millis(100),
                    max_interval: Duration::from_secs(1),
                    max_elapsed_time: None,
                    ..Default::default()
                };
                let mut attempt = 0u32;
                loop {
                    match downloader
                        .load_chunk(&chunk_key, channel_name.as_deref(), &label, producer)
                        .await
                    {
                        Ok(()) => return Ok(()),
                        Err(err) if err.is_retryable() && attempt < MAX_CHUNK_RETRIES => {
                            attempt += 1;
                            let delay = backoff_policy.next_backoff().unwrap_or(Duration::from_millis(100));
                            warn!(sha1 = %chunk.sha1, attempt, %err, "retrying chunk fetch");
                            tokio::time::sleep(delay).await;
                        }
                        Err(err) => {
                            aborted.store(true, Ordering::SeqCst);
                            return Err(err);
                        }
                    }
                }
            }
        }))
        .buffer_unordered(MANIFEST_FAN_OUT)
        .collect()
        .await;

        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err);
        }

        self.cas
            .concatenate_chunks_and_store_result(&manifest.sha1, &manifest.chunk_sha1s())
            .await?;
        Ok(manifest.size)
    }

    async fn load_chunk(
        &self,
        chunk_key: &FileKey,
        channel_name: Option<&str>,
        label: &str,
        producer: Option<&DataStreamProducer>,
    ) -> Result<(), KacheryError> {
        let found = self.cas.find_file(chunk_key).await?;
        if found.found {
            return Ok(());
        }
        let mut stream = self.load_file(chunk_key.clone(), channel_name.map(String::from), label.to_string());
        relay_to_completion(&mut stream, producer).await?;
        Ok(())
    }
}

/// Drains a CAS bucket-download `DataStream`, forwarding progress to the
/// caller's own producer (if any) so a manifest-driven parent stream's
/// progress reflects its children, and returns the final size.
async fn relay_to_completion(
    download: &mut DataStream,
    producer: Option<&DataStreamProducer>,
) -> Result<u64, KacheryError> {
    loop {
        match download.next_event().await {
            Some(kachery_types::StreamEvent::Progress { bytes_loaded, total }) => {
                if let Some(p) = producer {
                    p.progress(bytes_loaded, total).await;
                }
            }
            Some(kachery_types::StreamEvent::Finished { size }) => return Ok(size),
            Some(kachery_types::StreamEvent::Error(err)) => return Err(err),
            Some(kachery_types::StreamEvent::Cancelled) => return Err(KacheryError::Cancelled),
            None => return Err(KacheryError::transient("bucket download stream closed without a terminal event")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use tempfile::tempdir;

    use super::*;

    #[derive(Clone, Default)]
    struct FakeBucket {
        objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl FakeBucket {
        fn with(objects: HashMap<String, Vec<u8>>) -> Self {
            Self { objects: Arc::new(Mutex::new(objects)) }
        }
    }

    #[async_trait::async_trait]
    impl BucketLookup for FakeBucket {
        async fn head(&self, _channel_name: &str, sha1: &str) -> Result<bool, KacheryError> {
            Ok(self.objects.lock().unwrap().contains_key(sha1))
        }

        async fn open_stream(&self, _channel_name: &str, sha1: &str) -> Result<crate::traits::BucketReader, KacheryError> {
            let bytes = self
                .objects
                .lock()
                .unwrap()
                .get(sha1)
                .cloned()
                .ok_or_else(|| KacheryError::not_found(sha1.to_string()))?;
            Ok(Box::new(std::io::Cursor::new(bytes)))
        }
    }

    struct AlwaysFails;

    #[async_trait::async_trait]
    impl RemoteFileCoordinator for AlwaysFails {
        async fn request_and_await_upload(&self, _channel_name: &str, _file_key: &FileKey) -> Result<(), KacheryError> {
            Err(KacheryError::not_found("no node has this file"))
        }
    }

    /// Simulates a peer uploading the requested file to the bucket in
    /// response to `requestFile`, so `direct_load`'s second HEAD probe finds it.
    struct UploadsOnRequest {
        bucket: FakeBucket,
        data: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl RemoteFileCoordinator for UploadsOnRequest {
        async fn request_and_await_upload(&self, _channel_name: &str, file_key: &FileKey) -> Result<(), KacheryError> {
            let sha1 = file_key.sha1.clone().unwrap_or_default();
            self.bucket.objects.lock().unwrap().insert(sha1, self.data.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn local_hit_never_touches_bucket_or_coordinator() {
        let dir = tempdir().unwrap();
        let cas = KacheryStorageManager::new(dir.path());
        let result = cas.store_file_from_buffer("samehash", b"abc").await;
        // store_file_from_buffer trusts the caller's sha1, fine for this test.
        assert!(result.is_ok());

        let downloader = Downloader::new(cas, Arc::new(FakeBucket::default()), Arc::new(AlwaysFails));
        let key = FileKey::from_sha1("samehash");
        let found = downloader.load_file_async(&key, None, "test").await.unwrap();
        assert!(found.found);
    }

    #[tokio::test]
    async fn direct_load_hits_bucket_on_first_pass() {
        let dir = tempdir().unwrap();
        let cas = KacheryStorageManager::new(dir.path());
        let sha1 = shared_crypto::sha1_hex(b"hello\n");
        let mut objects = HashMap::new();
        objects.insert(sha1.clone(), b"hello\n".to_vec());

        let downloader = Downloader::new(cas.clone(), Arc::new(FakeBucket::with(objects)), Arc::new(AlwaysFails));
        let key = FileKey::from_sha1(sha1.clone());
        let found = downloader.load_file_async(&key, Some("ch1"), "test").await.unwrap();
        assert!(found.found);
        assert_eq!(found.size, 6);
    }

    #[tokio::test]
    async fn direct_load_fails_after_two_empty_passes() {
        let dir = tempdir().unwrap();
        let cas = KacheryStorageManager::new(dir.path());
        let downloader = Downloader::new(cas, Arc::new(FakeBucket::default()), Arc::new(AlwaysFails));
        let key = FileKey::from_sha1("0".repeat(40));
        let err = downloader.load_file_async(&key, Some("ch1"), "test").await.unwrap_err();
        assert!(matches!(err, KacheryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn direct_load_second_pass_finds_file_uploaded_via_coordinator() {
        let dir = tempdir().unwrap();
        let cas = KacheryStorageManager::new(dir.path());
        let data = b"second pass bytes".to_vec();
        let sha1 = shared_crypto::sha1_hex(&data);
        let bucket = FakeBucket::default();

        let downloader = Downloader::new(
            cas,
            Arc::new(bucket.clone()),
            Arc::new(UploadsOnRequest { bucket, data: data.clone() }),
        );
        let key = FileKey::from_sha1(sha1);
        let found = downloader.load_file_async(&key, Some("ch1"), "test").await.unwrap();
        assert!(found.found);
        assert_eq!(found.size, data.len() as u64);
    }

    #[tokio::test]
    async fn manifest_driven_load_reassembles_from_bucket_chunks() {
        let dir = tempdir().unwrap();
        let cas = KacheryStorageManager::new(dir.path());

        // Build the manifest and chunk bytes independently of the CAS, and
        // serve all of it from a fake bucket, so this exercises the
        // downloader actually fetching every piece remotely rather than
        // finding any of it already local.
        let data = vec![9u8; 30_000_000];
        let chunk_bounds = [(0u64, 20_000_000u64), (20_000_000, 30_000_000)];
        let chunks: Vec<kachery_types::ManifestChunk> = chunk_bounds
            .iter()
            .map(|&(start, end)| kachery_types::ManifestChunk {
                start,
                end,
                sha1: shared_crypto::sha1_hex(&data[start as usize..end as usize]),
            })
            .collect();
        let file_sha1 = shared_crypto::sha1_hex(&data);
        let manifest = FileManifest { size: data.len() as u64, sha1: file_sha1.clone(), chunks: chunks.clone() };
        let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
        let manifest_sha1 = shared_crypto::sha1_hex(&manifest_bytes);

        let mut objects = HashMap::new();
        objects.insert(manifest_sha1.clone(), manifest_bytes);
        for chunk in &chunks {
            objects.insert(chunk.sha1.clone(), data[chunk.start as usize..chunk.end as usize].to_vec());
        }

        let downloader = Downloader::new(cas.clone(), Arc::new(FakeBucket::with(objects)), Arc::new(AlwaysFails));
        let key = FileKey { sha1: Some(file_sha1), manifest_sha1: Some(manifest_sha1), chunk_of: None };
        let found = downloader.load_file_async(&key, Some("ch1"), "test").await.unwrap();
        assert!(found.found);
        let path = found.local_path.unwrap();
        let reassembled = tokio::fs::read(&path).await.unwrap();
        assert_eq!(reassembled, data);
    }
}
