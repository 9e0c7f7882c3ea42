use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::KacheryError;

/// Terminal-or-progress events delivered by a [`DataStream`]. `Finished`,
/// `Error`, and `Cancelled` are each delivered at most once and end the
/// stream; `Progress` may be delivered any number of times before a terminal
/// event.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Progress { bytes_loaded: u64, total: Option<u64> },
    Finished { size: u64 },
    Error(KacheryError),
    Cancelled,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Error(_) | Self::Cancelled)
    }
}

/// A cooperative, cancellable, observable byte transfer. Reimplements the
/// source's callback-based `onData`/`onError`/`onFinished`/`onCancelled`
/// stream as a consumable channel plus a shared cancel flag, matching the
/// handle/event-loop split this workspace uses elsewhere (see
/// `kachery-network`'s `HubCoordinator` and its upstream `state_sync::Handle`).
pub struct DataStream {
    events: mpsc::Receiver<StreamEvent>,
    cancelled: Arc<AtomicBool>,
}

impl DataStream {
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Drains the stream to its terminal event, summing progress as it goes.
    pub async fn run_to_completion(&mut self) -> Result<u64, KacheryError> {
        let mut loaded = 0u64;
        loop {
            match self.next_event().await {
                Some(StreamEvent::Progress { bytes_loaded, .. }) => loaded += bytes_loaded,
                Some(StreamEvent::Finished { size }) => return Ok(size),
                Some(StreamEvent::Error(err)) => return Err(err),
                Some(StreamEvent::Cancelled) => return Err(KacheryError::Cancelled),
                None => return Err(KacheryError::transient("stream closed without terminal event")),
            }
        }
    }

    /// Cooperative cancel: sets the shared flag; the producer observes it at
    /// its next suspension point and emits `Cancelled` exactly once.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Producer-side handle used by whatever is driving the transfer (CAS ingest,
/// a chunk fetch) to emit events and check for cancellation.
pub struct DataStreamProducer {
    events: mpsc::Sender<StreamEvent>,
    cancelled: Arc<AtomicBool>,
    finished: bool,
}

impl DataStreamProducer {
    pub fn new_pair() -> (DataStream, DataStreamProducer) {
        let (tx, rx) = mpsc::channel(64);
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            DataStream {
                events: rx,
                cancelled: cancelled.clone(),
            },
            DataStreamProducer {
                events: tx,
                cancelled,
                finished: false,
            },
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn progress(&self, bytes_loaded: u64, total: Option<u64>) {
        let _ = self
            .events
            .send(StreamEvent::Progress { bytes_loaded, total })
            .await;
    }

    pub async fn finish(mut self, size: u64) {
        self.finished = true;
        let _ = self.events.send(StreamEvent::Finished { size }).await;
    }

    pub async fn fail(mut self, error: KacheryError) {
        self.finished = true;
        let _ = self.events.send(StreamEvent::Error(error)).await;
    }

    pub async fn cancelled(mut self) {
        self.finished = true;
        let _ = self.events.send(StreamEvent::Cancelled).await;
    }
}

impl Drop for DataStreamProducer {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.events.try_send(StreamEvent::Error(KacheryError::transient(
                "producer dropped without a terminal event",
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finish_is_observed_as_terminal() {
        let (mut stream, producer) = DataStreamProducer::new_pair();
        producer.progress(10, Some(100)).await;
        producer.finish(100).await;
        let size = stream.run_to_completion().await.unwrap();
        assert_eq!(size, 100);
    }

    #[tokio::test]
    async fn cancel_flag_is_observable_by_producer() {
        let (stream, producer) = DataStreamProducer::new_pair();
        stream.cancel();
        assert!(producer.is_cancelled());
    }
}
