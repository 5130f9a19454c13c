//! In-process change feed for ticket row updates.
use tokio::sync::broadcast;

use crate::models::TicketChange;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of ticket updates to every subscribed board.
///
/// A lagging receiver loses the oldest changes; the next reconcile corrects its counts.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<TicketChange>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        ChangeFeed { tx }
    }

    /// Returns how many subscribers received the change. Nobody listening is not an error.
    pub fn publish(&self, change: TicketChange) -> usize {
        match self.tx.send(change) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!("ticket change published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TicketChange> {
        self.tx.subscribe()
    }
}
