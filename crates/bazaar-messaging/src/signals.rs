use bazaar_types::events::UnreadSignal;
use tokio::sync::broadcast;
use tracing::debug;

/// In-process pub/sub for unread-state changes. Each open surface (thread
/// view, inbox badge) subscribes instead of polling the server.
#[derive(Clone)]
pub struct UnreadSignalBus {
    tx: broadcast::Sender<UnreadSignal>,
}

impl UnreadSignalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, signal: UnreadSignal) {
        match self.tx.send(signal) {
            Ok(listeners) => debug!("Unread signal delivered to {} listeners", listeners),
            Err(_) => debug!("Unread signal dropped: no listeners"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UnreadSignal> {
        self.tx.subscribe()
    }
}

impl Default for UnreadSignalBus {
    fn default() -> Self {
        Self::new(64)
    }
}
