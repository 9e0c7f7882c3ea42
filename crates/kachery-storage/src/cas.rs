use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use kachery_types::{DataStream, DataStreamProducer, FileKey, FileManifest, KacheryError};
use shared_crypto::{sha1_hex, StreamingHasher};

use crate::layout;
use crate::link_file::{LinkFile, LinkStat};
use crate::manifest_builder::ManifestBuilder;

const READ_CHUNK_SIZE: usize = 64 * 1024;
const RENAME_STAT_LOOP_TIMEOUT: Duration = Duration::from_secs(10);
const MTIME_TOLERANCE_MS: i64 = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FindFileResult {
    pub found: bool,
    pub size: u64,
    pub local_path: Option<PathBuf>,
}

impl FindFileResult {
    fn not_found() -> Self {
        Self {
            found: false,
            size: 0,
            local_path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreResult {
    pub sha1: String,
    pub manifest_sha1: Option<String>,
    pub size: u64,
}

/// Local content-addressed store. The filesystem under `storage_dir` is the
/// only index; there is no in-memory table to rebuild on restart.
#[derive(Clone)]
pub struct KacheryStorageManager {
    storage_dir: PathBuf,
    on_file_stored: tokio::sync::broadcast::Sender<String>,
}

impl KacheryStorageManager {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(256);
        Self {
            storage_dir: storage_dir.into(),
            on_file_stored: tx,
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Subscribers receive a sha1 after every successful install, whether it
    /// came from a buffer, a stream, a bucket download, or chunk
    /// reassembly.
    pub fn subscribe_file_stored(&self) -> tokio::sync::broadcast::Receiver<String> {
        self.on_file_stored.subscribe()
    }

    pub async fn find_file(&self, file_key: &FileKey) -> Result<FindFileResult, KacheryError> {
        if let Some(chunk_of) = &file_key.chunk_of {
            let parent = Box::pin(self.find_file(&chunk_of.file_key)).await?;
            if !parent.found {
                return Ok(FindFileResult::not_found());
            }
            return Ok(FindFileResult {
                found: true,
                size: chunk_of.end_byte - chunk_of.start_byte,
                local_path: None,
            });
        }
        let sha1 = file_key
            .sha1
            .as_deref()
            .ok_or_else(|| KacheryError::protocol("file key has neither sha1 nor chunkOf"))?;
        self.find_by_sha1(sha1).await
    }

    pub async fn has_local_file(&self, file_key: &FileKey) -> Result<bool, KacheryError> {
        Ok(self.find_file(file_key).await?.found)
    }

    async fn find_by_sha1(&self, sha1: &str) -> Result<FindFileResult, KacheryError> {
        let direct = layout::content_path(&self.storage_dir, sha1);
        if let Ok(meta) = tokio::fs::metadata(&direct).await {
            return Ok(FindFileResult {
                found: true,
                size: meta.len(),
                local_path: Some(direct),
            });
        }

        let link_path = layout::link_path(&self.storage_dir, sha1);
        if let Ok(bytes) = tokio::fs::read(&link_path).await {
            if let Ok(link) = serde_json::from_slice::<LinkFile>(&bytes) {
                if let Ok(meta) = tokio::fs::metadata(&link.path).await {
                    if meta.len() == link.stat.size {
                        return Ok(FindFileResult {
                            found: true,
                            size: meta.len(),
                            local_path: Some(PathBuf::from(&link.path)),
                        });
                    }
                }
            }
        }

        Ok(FindFileResult::not_found())
    }

    pub async fn store_file_from_buffer(&self, sha1: &str, data: &[u8]) -> Result<(), KacheryError> {
        let dest = layout::content_path(&self.storage_dir, sha1);
        if tokio::fs::metadata(&dest).await.is_ok() {
            return Ok(());
        }
        tokio::fs::create_dir_all(layout::tmp_dir(&self.storage_dir))
            .await
            .map_err(|e| KacheryError::io(layout::tmp_dir(&self.storage_dir), &e))?;
        let tmp = layout::tmp_path(&self.storage_dir, "buf");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| KacheryError::io(&tmp, &e))?;
        self.install_tmp(&tmp, sha1, data.len() as u64).await
    }

    /// Single-pass ingest used by `storeLocalFile` and `linkLocalFile`'s
    /// hash-only pass. `expected_sha1` is `None` here; bucket downloads go
    /// through [`Self::store_file_from_bucket_download`] instead, which
    /// checks the hash and reports progress as a [`DataStream`].
    pub async fn store_file_from_stream<R>(
        &self,
        reader: R,
        calculate_hash_only: bool,
    ) -> Result<StoreResult, KacheryError>
    where
        R: AsyncRead + Unpin,
    {
        self.ingest(reader, calculate_hash_only, None, None).await
    }

    /// Streams from an already-open bucket GET. Reports progress and the
    /// terminal event via the returned `DataStream`; the caller re-queries
    /// `find_file` once it sees `Finished` to get the installed path.
    pub fn store_file_from_bucket_download<R>(&self, reader: R, expected_sha1: String) -> DataStream
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (stream, producer) = DataStreamProducer::new_pair();
        let manager = self.clone();
        tokio::spawn(async move {
            match manager
                .ingest(reader, false, Some(expected_sha1.as_str()), Some(&producer))
                .await
            {
                Ok(result) => producer.finish(result.size).await,
                Err(err) => producer.fail(err).await,
            }
        });
        stream
    }

    pub async fn store_local_file(&self, path: impl AsRef<Path>) -> Result<StoreResult, KacheryError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| KacheryError::io(path, &e))?;
        self.store_file_from_stream(file, false).await
    }

    pub async fn link_local_file(
        &self,
        path: impl AsRef<Path>,
        declared_size: u64,
        declared_mtime_ms: i64,
    ) -> Result<StoreResult, KacheryError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| KacheryError::io(path, &e))?;
        if meta.len() != declared_size {
            return Err(KacheryError::precondition(format!(
                "observed size {} does not match declared size {}",
                meta.len(),
                declared_size
            )));
        }
        let observed_mtime_ms = file_mtime_ms(&meta)?;
        if (observed_mtime_ms - declared_mtime_ms).abs() > MTIME_TOLERANCE_MS {
            return Err(KacheryError::precondition(format!(
                "observed mtime {observed_mtime_ms} differs from declared mtime {declared_mtime_ms} by more than {MTIME_TOLERANCE_MS}ms"
            )));
        }

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| KacheryError::io(path, &e))?;
        let result = self.store_file_from_stream(file, true).await?;

        let link = LinkFile {
            path: path.to_string_lossy().into_owned(),
            manifest_sha1: result.manifest_sha1.clone(),
            stat: LinkStat {
                size: declared_size,
                mtime: declared_mtime_ms,
            },
        };
        let link_bytes =
            serde_json::to_vec(&link).map_err(|e| KacheryError::protocol(e.to_string()))?;
        tokio::fs::create_dir_all(layout::tmp_dir(&self.storage_dir))
            .await
            .map_err(|e| KacheryError::io(layout::tmp_dir(&self.storage_dir), &e))?;
        let tmp = layout::tmp_path(&self.storage_dir, "link");
        tokio::fs::write(&tmp, &link_bytes)
            .await
            .map_err(|e| KacheryError::io(&tmp, &e))?;
        let dest = layout::link_path(&self.storage_dir, &result.sha1);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KacheryError::io(parent, &e))?;
        }
        tokio::fs::rename(&tmp, &dest)
            .await
            .map_err(|e| KacheryError::io(&dest, &e))?;

        Ok(result)
    }

    pub async fn concatenate_chunks_and_store_result(
        &self,
        expected_sha1: &str,
        chunk_sha1s: &[String],
    ) -> Result<(), KacheryError> {
        let dest = layout::content_path(&self.storage_dir, expected_sha1);
        if tokio::fs::metadata(&dest).await.is_ok() {
            return Ok(());
        }

        tokio::fs::create_dir_all(layout::tmp_dir(&self.storage_dir))
            .await
            .map_err(|e| KacheryError::io(layout::tmp_dir(&self.storage_dir), &e))?;
        let tmp = layout::tmp_path(&self.storage_dir, "concat");
        let mut tmp_file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| KacheryError::io(&tmp, &e))?;
        let mut hasher = StreamingHasher::new();
        let mut total: u64 = 0;

        for chunk_sha1 in chunk_sha1s {
            let found = self.find_by_sha1(chunk_sha1).await?;
            if !found.found {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(KacheryError::not_found(format!("chunk {chunk_sha1} not present locally")));
            }
            let chunk_path = found
                .local_path
                .ok_or_else(|| KacheryError::protocol("chunk resolved without a local path"))?;
            let mut chunk_file = tokio::fs::File::open(&chunk_path)
                .await
                .map_err(|e| KacheryError::io(&chunk_path, &e))?;
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let n = chunk_file
                    .read(&mut buf)
                    .await
                    .map_err(|e| KacheryError::io(&chunk_path, &e))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                tmp_file
                    .write_all(&buf[..n])
                    .await
                    .map_err(|e| KacheryError::io(&tmp, &e))?;
                total += n as u64;
            }
        }
        tmp_file
            .shutdown()
            .await
            .map_err(|e| KacheryError::io(&tmp, &e))?;

        let computed = hasher.finalize_hex();
        if computed != expected_sha1 {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(KacheryError::hash_mismatch(expected_sha1, &computed));
        }

        self.install_tmp(&tmp, expected_sha1, total).await
    }

    /// Streams `[start_byte, end_byte)` of the file named by `file_key`. For a
    /// `chunkOf` key, the range is translated into an absolute range within
    /// the parent file before opening it.
    pub async fn get_read_stream(
        &self,
        file_key: &FileKey,
        start_byte: Option<u64>,
        end_byte: Option<u64>,
    ) -> Result<(tokio::fs::File, u64, u64), KacheryError> {
        let (sha1, range_start, range_end) = if let Some(chunk_of) = &file_key.chunk_of {
            let parent_sha1 = chunk_of
                .file_key
                .sha1
                .as_deref()
                .ok_or_else(|| KacheryError::protocol("chunkOf parent key has no sha1"))?;
            (parent_sha1.to_string(), chunk_of.start_byte, chunk_of.end_byte)
        } else {
            let sha1 = file_key
                .sha1
                .as_deref()
                .ok_or_else(|| KacheryError::protocol("file key has neither sha1 nor chunkOf"))?;
            let found = self.find_by_sha1(sha1).await?;
            let end = end_byte.unwrap_or(found.size);
            (sha1.to_string(), start_byte.unwrap_or(0), end)
        };

        let found = self.find_by_sha1(&sha1).await?;
        if !found.found {
            return Err(KacheryError::not_found(format!("sha1 {sha1} not present locally")));
        }
        let path = found
            .local_path
            .ok_or_else(|| KacheryError::protocol("resolved file has no local path"))?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| KacheryError::io(&path, &e))?;
        use tokio::io::AsyncSeekExt;
        file.seek(std::io::SeekFrom::Start(range_start))
            .await
            .map_err(|e| KacheryError::io(&path, &e))?;
        Ok((file, range_start, range_end))
    }

    pub async fn move_file_to_trash(&self, sha1: &str) -> Result<(), KacheryError> {
        let src = layout::content_path(&self.storage_dir, sha1);
        let dest = layout::trash_path(&self.storage_dir, sha1);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KacheryError::io(parent, &e))?;
        }
        if tokio::fs::metadata(&dest).await.is_ok() {
            tokio::fs::remove_file(&src)
                .await
                .map_err(|e| KacheryError::io(&src, &e))?;
            return Ok(());
        }
        tokio::fs::rename(&src, &dest)
            .await
            .map_err(|e| KacheryError::io(&dest, &e))
    }

    async fn ingest<R>(
        &self,
        mut reader: R,
        calculate_hash_only: bool,
        expected_sha1: Option<&str>,
        producer: Option<&DataStreamProducer>,
    ) -> Result<StoreResult, KacheryError>
    where
        R: AsyncRead + Unpin,
    {
        let tmp = if calculate_hash_only {
            None
        } else {
            tokio::fs::create_dir_all(layout::tmp_dir(&self.storage_dir))
                .await
                .map_err(|e| KacheryError::io(layout::tmp_dir(&self.storage_dir), &e))?;
            Some(layout::tmp_path(&self.storage_dir, "stream"))
        };
        let mut tmp_file = match &tmp {
            Some(path) => Some(
                tokio::fs::File::create(path)
                    .await
                    .map_err(|e| KacheryError::io(path, &e))?,
            ),
            None => None,
        };

        let mut hasher = StreamingHasher::new();
        let mut manifest_builder = ManifestBuilder::new();
        let mut total: u64 = 0;
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(p) = producer {
                if p.is_cancelled() {
                    drop(tmp_file.take());
                    if let Some(path) = &tmp {
                        let _ = tokio::fs::remove_file(path).await;
                    }
                    return Err(KacheryError::Cancelled);
                }
            }
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| KacheryError::transient(e.to_string()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            manifest_builder.update(&buf[..n]);
            if let Some(file) = tmp_file.as_mut() {
                file.write_all(&buf[..n])
                    .await
                    .map_err(|e| KacheryError::transient(e.to_string()))?;
            }
            total += n as u64;
            if let Some(p) = producer {
                p.progress(n as u64, None).await;
            }
        }

        if let Some(file) = tmp_file.as_mut() {
            file.shutdown()
                .await
                .map_err(|e| KacheryError::transient(e.to_string()))?;
        }

        let sha1 = hasher.finalize_hex();
        if let Some(expected) = expected_sha1 {
            if !shared_crypto::constant_time_eq(expected, &sha1) {
                if let Some(path) = &tmp {
                    let _ = tokio::fs::remove_file(path).await;
                }
                return Err(KacheryError::hash_mismatch(expected, &sha1));
            }
        }

        let chunks = manifest_builder.finish();
        let manifest_sha1 = if chunks.len() > 1 {
            let manifest = FileManifest {
                size: total,
                sha1: sha1.clone(),
                chunks,
            };
            let manifest_bytes =
                serde_json::to_vec(&manifest).map_err(|e| KacheryError::protocol(e.to_string()))?;
            let manifest_sha1 = sha1_hex(&manifest_bytes);
            self.store_file_from_buffer(&manifest_sha1, &manifest_bytes).await?;
            Some(manifest_sha1)
        } else {
            None
        };

        if let Some(path) = &tmp {
            self.install_tmp(path, &sha1, total).await?;
        }

        Ok(StoreResult {
            sha1,
            manifest_sha1,
            size: total,
        })
    }

    async fn install_tmp(&self, tmp: &Path, sha1: &str, expected_size: u64) -> Result<(), KacheryError> {
        let dest = layout::content_path(&self.storage_dir, sha1);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KacheryError::io(parent, &e))?;
        }

        if tokio::fs::metadata(&dest).await.is_ok() {
            debug!(sha1, "content already installed by another writer, dropping temp");
            let _ = tokio::fs::remove_file(tmp).await;
            let _ = self.on_file_stored.send(sha1.to_string());
            return Ok(());
        }

        if let Err(err) = tokio::fs::rename(tmp, &dest).await {
            if tokio::fs::metadata(&dest).await.is_ok() {
                warn!(sha1, %err, "rename failed even though file exists, treating as success");
                let _ = tokio::fs::remove_file(tmp).await;
            } else {
                return Err(KacheryError::transient(format!("rename to {dest:?} failed: {err}")));
            }
        } else {
            set_mode_0644(&dest).await?;
        }

        wait_for_stable_size(&dest, expected_size).await?;
        let _ = self.on_file_stored.send(sha1.to_string());
        Ok(())
    }
}

#[cfg(unix)]
async fn set_mode_0644(path: &Path) -> Result<(), KacheryError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .await
        .map_err(|e| KacheryError::io(path, &e))
}

#[cfg(not(unix))]
async fn set_mode_0644(_path: &Path) -> Result<(), KacheryError> {
    Ok(())
}

async fn wait_for_stable_size(path: &Path, expected_size: u64) -> Result<(), KacheryError> {
    let policy = backoff::ExponentialBackoff {
        initial_interval: Duration::from_millis(25),
        max_interval: Duration::from_millis(25),
        randomization_factor: 0.0,
        max_elapsed_time: Some(RENAME_STAT_LOOP_TIMEOUT),
        ..Default::default()
    };
    backoff::future::retry(policy, || async move {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() == expected_size => Ok(()),
            _ => Err(backoff::Error::transient(KacheryError::transient(format!(
                "{path:?} did not reach expected size {expected_size} within {RENAME_STAT_LOOP_TIMEOUT:?}"
            )))),
        }
    })
    .await
}

#[cfg(unix)]
fn file_mtime_ms(meta: &std::fs::Metadata) -> Result<i64, KacheryError> {
    use std::os::unix::fs::MetadataExt;
    Ok(meta.mtime() * 1000 + meta.mtime_nsec() / 1_000_000)
}

#[cfg(not(unix))]
fn file_mtime_ms(meta: &std::fs::Metadata) -> Result<i64, KacheryError> {
    let modified = meta
        .modified()
        .map_err(|e| KacheryError::Io { path: PathBuf::new(), message: e.to_string() })?;
    let duration = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| KacheryError::protocol(e.to_string()))?;
    Ok(duration.as_millis() as i64)
}
