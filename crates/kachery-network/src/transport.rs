use async_trait::async_trait;
use tokio::sync::mpsc;

use kachery_types::{KacheryError, PubsubEnvelope};

/// Subscribe/publish/deliver over signed envelopes. The concrete transport
/// (registration, authorization, wire framing) is a named external
/// collaborator; `HubCoordinator` only needs this much of it.
#[async_trait]
pub trait PubsubTransport: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<PubsubEnvelope>, KacheryError>;

    async fn publish(&self, channel: &str, envelope: PubsubEnvelope) -> Result<(), KacheryError>;
}
