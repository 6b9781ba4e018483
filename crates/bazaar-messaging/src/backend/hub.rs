use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ChangeEvent, EventFilter, Subscription};

/// Fans committed row changes out to realtime channels.
#[derive(Clone)]
pub(crate) struct RealtimeHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// Every committed change; each channel task keeps only what its filter
    /// selects.
    changes: broadcast::Sender<ChangeEvent>,

    /// Open channels: name -> close token
    channels: Mutex<Vec<(String, CancellationToken)>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(HubInner {
                changes,
                channels: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.inner.changes.send(event);
    }

    /// Open a channel. Must be called from within a Tokio runtime.
    pub fn subscribe(&self, channel: &str, filter: EventFilter) -> Subscription {
        // Subscribe before returning so nothing committed after this call is missed
        let mut changes = self.inner.changes.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        {
            let mut channels = self.inner.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels.retain(|(_, closed)| !closed.is_cancelled());
            channels.push((channel.to_string(), closed.clone()));
        }

        let name = channel.to_string();
        let task_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_closed.cancelled() => break,
                    result = changes.recv() => {
                        let event = match result {
                            Ok(event) => event,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Realtime channel {} lagged by {} events", name, n);
                                continue;
                            }
                            Err(_) => break,
                        };

                        if !filter.matches(&event) {
                            continue;
                        }
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                }
            }
            task_closed.cancel();
            debug!("Realtime channel {} closed", name);
        });

        Subscription::new(channel, rx, closed)
    }

    /// Names of channels that have not been closed yet.
    pub fn active_channels(&self) -> Vec<String> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, closed)| !closed.is_cancelled())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Entries still held in the channel registry, closed or not.
    #[cfg(test)]
    fn registered(&self) -> usize {
        self.inner.channels.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
