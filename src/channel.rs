//! Completion bus: carries finished nodes' reports to the coordinator loop

use tokio::sync::mpsc;

use crate::protocol::Completion;

/// What a worker-node task posts when it stops
#[derive(Debug)]
pub enum BusEvent {
    /// The node produced its one completion report
    Completed(Completion),
    /// The node could not report (programming error, e.g. double completion)
    Faulted { node_id: String, error: String },
}

/// Producer side, cloned into every worker-node task
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<BusEvent>,
}

impl CompletionSender {
    pub fn send(&self, event: BusEvent) -> Result<(), ChannelError> {
        self.tx.send(event).map_err(|_| ChannelError::Closed)
    }
}

/// Consumer side, drained by exactly one coordinator loop
#[derive(Debug)]
pub struct CompletionReceiver {
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

impl CompletionReceiver {
    /// Receive the next event; fails once every sender is dropped
    pub async fn recv(&mut self) -> Result<BusEvent, ChannelError> {
        self.rx.recv().await.ok_or(ChannelError::Closed)
    }
}

/// Create a connected sender/receiver pair
pub fn completion_bus() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionSender { tx }, CompletionReceiver { rx })
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Completion bus is closed")]
    Closed,
}
