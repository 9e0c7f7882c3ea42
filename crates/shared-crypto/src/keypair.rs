use ed25519_consensus::SigningKey;
use rand::thread_rng;

/// Thin wrapper around the node's Ed25519 signing key. Kept as a distinct
/// type (rather than exposing `ed25519_consensus::SigningKey` directly) so
/// the concrete curve can change behind this seam without touching callers,
/// the same role `narwhal-crypto`'s type aliases play upstream.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn generate() -> Self {
        Self(SigningKey::new(thread_rng()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(SigningKey::from(bytes))
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.0.verification_key().to_bytes())
    }
}
