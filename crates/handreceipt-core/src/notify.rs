//! Post-commit notification of state transitions.
//!
//! Notifiers are told about events after their transaction committed. They
//! cannot fail the operation and must not block.

use tokio::sync::broadcast;
use tracing::trace;

use crate::event::LedgerEvent;

pub trait TransitionNotifier: Send + Sync {
    fn notify(&self, events: &[LedgerEvent]);
}

/// Discards notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl TransitionNotifier for NoopNotifier {
    fn notify(&self, _events: &[LedgerEvent]) {}
}

/// Fans committed events out to any number of subscribers.
///
/// Slow subscribers lag and lose the oldest events rather than holding
/// back the engine.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<LedgerEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }
}

impl TransitionNotifier for BroadcastNotifier {
    fn notify(&self, events: &[LedgerEvent]) {
        for event in events {
            // No receivers is fine.
            if self.sender.send(event.clone()).is_err() {
                trace!(event = event.name(), "no transition subscribers");
            }
        }
    }
}
