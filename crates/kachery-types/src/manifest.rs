use serde::{Deserialize, Serialize};

use crate::error::KacheryError;

/// Chunk boundary used by the streaming manifest builder and by the
/// downloader's fan-out. Every chunk but possibly the last is exactly this
/// many bytes.
pub const CHUNK_SIZE: u64 = 20_000_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestChunk {
    pub start: u64,
    pub end: u64,
    pub sha1: String,
}

impl ManifestChunk {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileManifest {
    pub size: u64,
    pub sha1: String,
    pub chunks: Vec<ManifestChunk>,
}

impl FileManifest {
    /// Checks the structural invariants a manifest must satisfy regardless of
    /// where it came from (freshly built, parsed off disk, or fetched from a
    /// bucket). Does not verify `sha1` against chunk contents; that requires
    /// the chunk bytes and is the caller's job.
    pub fn validate(&self) -> Result<(), KacheryError> {
        if self.chunks.is_empty() {
            return Err(KacheryError::protocol("manifest has no chunks"));
        }
        if self.chunks[0].start != 0 {
            return Err(KacheryError::protocol("manifest first chunk must start at 0"));
        }
        for pair in self.chunks.windows(2) {
            if pair[0].end != pair[1].start {
                return Err(KacheryError::protocol("manifest chunks are not contiguous"));
            }
        }
        let last = self.chunks.last().expect("checked non-empty above");
        if last.end != self.size {
            return Err(KacheryError::protocol("manifest last chunk does not reach declared size"));
        }
        let chunk_count = self.chunks.len();
        for (i, chunk) in self.chunks.iter().enumerate() {
            let len = chunk.len();
            if len > CHUNK_SIZE {
                return Err(KacheryError::protocol("manifest chunk exceeds chunk size"));
            }
            if i + 1 < chunk_count && len != CHUNK_SIZE {
                return Err(KacheryError::protocol(
                    "manifest non-final chunk is not exactly chunk-sized",
                ));
            }
        }
        Ok(())
    }

    pub fn chunk_sha1s(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.sha1.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: u64, end: u64) -> ManifestChunk {
        ManifestChunk {
            start,
            end,
            sha1: "0".repeat(40),
        }
    }

    #[test]
    fn two_chunk_manifest_validates() {
        let manifest = FileManifest {
            size: 30_000_000,
            sha1: "a".repeat(40),
            chunks: vec![chunk(0, 20_000_000), chunk(20_000_000, 30_000_000)],
        };
        manifest.validate().unwrap();
    }

    #[test]
    fn gap_between_chunks_is_rejected() {
        let manifest = FileManifest {
            size: 100,
            sha1: "a".repeat(40),
            chunks: vec![chunk(0, 40), chunk(50, 100)],
        };
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn undersized_non_final_chunk_is_rejected() {
        let manifest = FileManifest {
            size: 100,
            sha1: "a".repeat(40),
            chunks: vec![chunk(0, 50), chunk(50, 100)],
        };
        assert!(manifest.validate().is_err());
    }
}
