use serde::{Deserialize, Serialize};

/// Identifies a file, a byte range of another file, or leaves it to the
/// `manifest_sha1` field to name the manifest for a chunked file. Only the
/// fields that are `Some` participate in equality and canonical serialization.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FileKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,

    #[serde(
        rename = "manifestSha1",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub manifest_sha1: Option<String>,

    #[serde(rename = "chunkOf", skip_serializing_if = "Option::is_none", default)]
    pub chunk_of: Option<ChunkOf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChunkOf {
    #[serde(rename = "fileKey")]
    pub file_key: Box<FileKey>,
    #[serde(rename = "startByte")]
    pub start_byte: u64,
    #[serde(rename = "endByte")]
    pub end_byte: u64,
}

impl FileKey {
    pub fn from_sha1(sha1: impl Into<String>) -> Self {
        Self {
            sha1: Some(sha1.into()),
            ..Default::default()
        }
    }

    pub fn from_manifest_sha1(manifest_sha1: impl Into<String>) -> Self {
        Self {
            manifest_sha1: Some(manifest_sha1.into()),
            ..Default::default()
        }
    }

    pub fn chunk(sha1: impl Into<String>, parent: FileKey, start_byte: u64, end_byte: u64) -> Self {
        Self {
            sha1: Some(sha1.into()),
            chunk_of: Some(ChunkOf {
                file_key: Box::new(parent),
                start_byte,
                end_byte,
            }),
            ..Default::default()
        }
    }

    pub fn is_chunk(&self) -> bool {
        self.chunk_of.is_some()
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest_sha1.is_some()
    }
}
