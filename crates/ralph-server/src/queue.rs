// Event Queue
// In-process FIFO with a single consumer. Enqueue is non-blocking and safe
// for concurrent webhook handlers; the consumer processes one event to
// completion before taking the next.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ralph_core::{OrchestratorError, Result};
use ralph_wire::Envelope;

use crate::orchestrator::OrchestratorService;

#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| OrchestratorError::Other("event queue closed".to_string()))
    }
}

/// Drain the queue one event at a time until shutdown or channel close.
pub fn spawn_consumer(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    orchestrator: Arc<OrchestratorService>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(envelope) => orchestrator.handle_event(envelope).await,
                    None => break,
                },
            }
        }
        tracing::info!("event consumer stopped");
    })
}
