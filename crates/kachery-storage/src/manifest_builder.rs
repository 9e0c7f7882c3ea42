use kachery_types::{ManifestChunk, CHUNK_SIZE};
use shared_crypto::sha1_hex;

/// Cuts an incoming byte stream into fixed-size chunks as it arrives,
/// emitting a `ManifestChunk` per completed chunk plus a trailing remainder
/// on `finish`, whatever its length. A single-chunk result means the caller
/// should treat this file as unmanifested (`manifestSha1 = None`).
pub struct ManifestBuilder {
    buffer: Vec<u8>,
    next_start: u64,
    chunks: Vec<ManifestChunk>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            next_start: 0,
            chunks: Vec::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        while self.buffer.len() as u64 >= CHUNK_SIZE {
            let chunk_bytes: Vec<u8> = self.buffer.drain(0..CHUNK_SIZE as usize).collect();
            self.emit(chunk_bytes);
        }
    }

    pub fn finish(mut self) -> Vec<ManifestChunk> {
        if !self.buffer.is_empty() {
            let remainder = std::mem::take(&mut self.buffer);
            self.emit(remainder);
        } else if self.chunks.is_empty() {
            // Zero-byte file: still emit a single (empty) chunk so callers
            // always see at least one chunk.
            self.emit(Vec::new());
        }
        self.chunks
    }

    fn emit(&mut self, bytes: Vec<u8>) {
        let start = self.next_start;
        let end = start + bytes.len() as u64;
        let sha1 = sha1_hex(&bytes);
        self.chunks.push(ManifestChunk { start, end, sha1 });
        self.next_start = end;
    }
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
