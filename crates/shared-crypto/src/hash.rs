use sha1::{Digest, Sha1};

/// SHA-1 over a single buffer, hex-encoded lowercase.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Incremental SHA-1 for callers that see a file or stream in pieces (the
/// CAS ingest path, the manifest builder, chunk reassembly).
#[derive(Default)]
pub struct StreamingHasher(Sha1);

impl StreamingHasher {
    pub fn new() -> Self {
        Self(Sha1::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.0.finalize())
    }
}

/// Constant-time hex-string comparison. Used when comparing digests derived
/// from untrusted input, where an early-exit compare would leak timing.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_newline_hashes_to_known_value() {
        assert_eq!(
            sha1_hex(b"hello\n"),
            "f572d396fae9206628714fb2ce00f72e94f2258f"
        );
    }

    #[test]
    fn streaming_matches_one_shot() {
        let mut hasher = StreamingHasher::new();
        hasher.update(b"hello");
        hasher.update(b"\n");
        assert_eq!(hasher.finalize_hex(), sha1_hex(b"hello\n"));
    }

    #[test]
    fn constant_time_eq_rejects_different_lengths_and_content() {
        assert!(constant_time_eq("abcd", "abcd"));
        assert!(!constant_time_eq("abcd", "abce"));
        assert!(!constant_time_eq("abcd", "abcde"));
    }
}
