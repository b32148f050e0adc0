//! Mutation fan-out between concurrently-running views.
//!
//! An explicit, injectable bus object — views subscribe and hold the receiver
//! for exactly as long as they live; dropping it is the unsubscribe. The
//! durable store stays the source of truth: a view without a receiver still
//! observes every mutation on its next poll tick, the bus only makes the
//! pickup immediate.

use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    MessagePosted { session: String },
    MessagesRead { session: String, as_staff: bool },
    TicketCreated { id: i64, session: String },
    TicketUpdated { id: i64 },
    TicketDeleted { id: i64 },
    ConversationDeleted { session: String },
}

impl StoreEvent {
    /// Whether the event concerns the given session's conversation.
    pub fn touches_session(&self, session: &str) -> bool {
        match self {
            StoreEvent::MessagePosted { session: s }
            | StoreEvent::MessagesRead { session: s, .. }
            | StoreEvent::TicketCreated { session: s, .. }
            | StoreEvent::ConversationDeleted { session: s } => s == session,
            StoreEvent::TicketUpdated { .. } | StoreEvent::TicketDeleted { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Notify all live subscribers. Lagging or absent subscribers are fine —
    /// the send result is intentionally ignored.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
