use ed25519_consensus::{Signature as Ed25519Signature, VerificationKey};
use serde::Serialize;

use kachery_types::KacheryError;

use crate::canonical::to_canonical_bytes;
use crate::keypair::Keypair;

/// Canonically serializes `body`, signs it with `keypair`, and returns the
/// hex-encoded signature.
pub fn sign<T: Serialize>(body: &T, keypair: &Keypair) -> Result<String, KacheryError> {
    let bytes = to_canonical_bytes(body).map_err(|e| KacheryError::protocol(e.to_string()))?;
    let signature = keypair.signing_key().sign(&bytes);
    Ok(hex::encode(signature.to_bytes()))
}

/// Verifies `signature_hex` over the canonical serialization of `body` under
/// `public_key_hex`. Never panics on malformed input; a parse failure is
/// simply a verification failure, matching the interface-level "non-fatal"
/// contract — callers that need chain invariants upgrade `false` to a fatal
/// `IntegrityViolation`.
pub fn verify<T: Serialize>(body: &T, public_key_hex: &str, signature_hex: &str) -> bool {
    let Ok(bytes) = to_canonical_bytes(body) else {
        return false;
    };
    let Some(verification_key) = parse_verification_key(public_key_hex) else {
        return false;
    };
    let Some(signature) = parse_signature(signature_hex) else {
        return false;
    };
    verification_key.verify(&signature, &bytes).is_ok()
}

fn parse_verification_key(hex_str: &str) -> Option<VerificationKey> {
    let bytes = hex::decode(hex_str).ok()?;
    let array: [u8; 32] = bytes.try_into().ok()?;
    VerificationKey::try_from(array).ok()
}

fn parse_signature(hex_str: &str) -> Option<Ed25519Signature> {
    let bytes = hex::decode(hex_str).ok()?;
    Ed25519Signature::try_from(bytes.as_slice()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sign_then_verify_round_trips() {
        let keypair = Keypair::generate();
        let body = json!({"hello": "world", "n": 3});
        let signature = sign(&body, &keypair).unwrap();
        assert!(verify(&body, &keypair.public_key_hex(), &signature));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let keypair = Keypair::generate();
        let body = json!({"n": 1});
        let signature = sign(&body, &keypair).unwrap();
        let tampered = json!({"n": 2});
        assert!(!verify(&tampered, &keypair.public_key_hex(), &signature));
    }

    #[test]
    fn verify_rejects_garbage_signature() {
        let keypair = Keypair::generate();
        let body = json!({"n": 1});
        assert!(!verify(&body, &keypair.public_key_hex(), "not-hex"));
    }
}
