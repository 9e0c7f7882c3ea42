use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use kachery_types::{KacheryError, SignedSubfeedMessage};

/// One log per `(feedId, subfeedHash)`. Holds a verified in-memory copy of
/// the chain plus a writer mutex so concurrent `addSignedMessages` calls
/// serialize instead of interleaving appends.
pub struct SubfeedStore {
    feed_id: String,
    subfeed_hash: String,
    log_path: PathBuf,
    messages: RwLock<Vec<SignedSubfeedMessage>>,
    write_lock: Mutex<()>,
}

impl SubfeedStore {
    /// Loads and verifies the chain from the backing log, or starts empty if
    /// the subfeed has never been written to locally (a remote-only subfeed
    /// not yet replicated).
    pub async fn open(storage_dir: &std::path::Path, feed_id: &str, subfeed_hash: &str) -> Result<Self, KacheryError> {
        let log_path = crate::layout::message_log_path(storage_dir, feed_id, subfeed_hash);
        let messages = match tokio::fs::read(&log_path).await {
            Ok(bytes) => parse_and_verify_chain(&bytes, feed_id)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(KacheryError::io(&log_path, &err)),
        };
        Ok(Self {
            feed_id: feed_id.to_string(),
            subfeed_hash: subfeed_hash.to_string(),
            log_path,
            messages: RwLock::new(messages),
            write_lock: Mutex::new(()),
        })
    }

    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    pub fn subfeed_hash(&self) -> &str {
        &self.subfeed_hash
    }

    pub async fn get_num_messages(&self) -> u64 {
        self.messages.read().await.len() as u64
    }

    pub async fn get_signed_messages(&self, start: u64, end: u64) -> Vec<SignedSubfeedMessage> {
        let messages = self.messages.read().await;
        let start = start.min(messages.len() as u64) as usize;
        let end = end.min(messages.len() as u64) as usize;
        if start >= end {
            return Vec::new();
        }
        messages[start..end].to_vec()
    }

    /// Appends `msgs` after checking the precondition against the current
    /// length and verifying the chain (`messageNumber`, `previousSignature`,
    /// and the Ed25519 signature itself) for every fresh entry, persisting
    /// the whole batch in one write, then splicing it into memory. Messages
    /// whose `messageNumber` is below the current length are silently
    /// dropped (idempotent replay); a chain inconsistency discards the
    /// entire batch rather than partially applying it. Returns the number of
    /// messages actually appended, so a caller can tell a no-op replay from
    /// a real local append worth replicating to a bucket.
    pub async fn add_signed_messages(&self, msgs: Vec<SignedSubfeedMessage>) -> Result<u64, KacheryError> {
        if msgs.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;

        let current_len = self.messages.read().await.len() as u64;
        let first_number = msgs[0].body.message_number;
        if current_len == 0 {
            if first_number != 0 {
                return Err(KacheryError::precondition(format!(
                    "first message of an empty subfeed must have messageNumber 0, got {first_number}"
                )));
            }
        } else if first_number > current_len {
            return Err(KacheryError::precondition(format!(
                "messageNumber {first_number} leaves a gap after {current_len} existing messages"
            )));
        }

        let fresh: Vec<SignedSubfeedMessage> = msgs
            .into_iter()
            .filter(|m| m.body.message_number >= current_len)
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        {
            let existing = self.messages.read().await;
            let mut previous_signature = existing.last().map(|m| m.signature.clone());
            let mut previous_message_number: i64 = existing.len() as i64 - 1;
            for msg in &fresh {
                if msg.body.message_number as i64 != previous_message_number + 1 {
                    return Err(KacheryError::IntegrityViolation {
                        reason: format!(
                            "expected messageNumber {}, found {}",
                            previous_message_number + 1,
                            msg.body.message_number
                        ),
                    });
                }
                if msg.body.previous_signature != previous_signature {
                    return Err(KacheryError::IntegrityViolation {
                        reason: "previousSignature does not match the prior message's signature".into(),
                    });
                }
                if !shared_crypto::verify(&msg.body, &self.feed_id, &msg.signature) {
                    return Err(KacheryError::IntegrityViolation {
                        reason: format!("signature verification failed at messageNumber {}", msg.body.message_number),
                    });
                }
                previous_message_number = msg.body.message_number as i64;
                previous_signature = Some(msg.signature.clone());
            }
        }

        let mut buf = Vec::new();
        for msg in &fresh {
            serde_json::to_writer(&mut buf, msg).map_err(|e| KacheryError::protocol(e.to_string()))?;
            buf.push(b'\n');
        }
        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KacheryError::io(parent, &e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(|e| KacheryError::io(&self.log_path, &e))?;
        file.write_all(&buf).await.map_err(|e| KacheryError::io(&self.log_path, &e))?;
        file.flush().await.map_err(|e| KacheryError::io(&self.log_path, &e))?;

        let mut messages = self.messages.write().await;
        let mut appended = 0u64;
        for msg in fresh {
            if msg.body.message_number == messages.len() as u64 {
                messages.push(msg);
                appended += 1;
            } else {
                warn!(
                    feed_id = %self.feed_id,
                    message_number = msg.body.message_number,
                    "dropping out-of-order message already covered by a concurrent append",
                );
            }
        }
        Ok(appended)
    }
}

fn parse_and_verify_chain(bytes: &[u8], feed_id: &str) -> Result<Vec<SignedSubfeedMessage>, KacheryError> {
    let mut messages = Vec::new();
    let mut previous_signature: Option<String> = None;
    let mut previous_message_number: i64 = -1;
    for line in bytes.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        let msg: SignedSubfeedMessage =
            serde_json::from_slice(line).map_err(|e| KacheryError::protocol(format!("corrupt subfeed log entry: {e}")))?;
        if msg.body.message_number as i64 != previous_message_number + 1 {
            return Err(KacheryError::IntegrityViolation {
                reason: format!(
                    "expected messageNumber {}, found {}",
                    previous_message_number + 1,
                    msg.body.message_number
                ),
            });
        }
        if msg.body.previous_signature != previous_signature {
            return Err(KacheryError::IntegrityViolation {
                reason: "previousSignature does not match the prior message's signature".into(),
            });
        }
        if !shared_crypto::verify(&msg.body, feed_id, &msg.signature) {
            return Err(KacheryError::IntegrityViolation {
                reason: format!("signature verification failed at messageNumber {}", msg.body.message_number),
            });
        }
        previous_message_number = msg.body.message_number as i64;
        previous_signature = Some(msg.signature.clone());
        messages.push(msg);
    }
    Ok(messages)
}
