use std::sync::Arc;

use bazaar_types::models::Role;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::directory::ConversationDirectory;
use crate::error::MessagingError;
use crate::signals::UnreadSignalBus;

/// The total-unread indicator for one account in one role.
pub struct UnreadBadge {
    directory: ConversationDirectory,
    account_id: Uuid,
    role: Role,
    count: watch::Sender<u32>,
}

impl UnreadBadge {
    pub fn new(directory: ConversationDirectory, account_id: Uuid, role: Role) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            directory,
            account_id,
            role,
            count,
        }
    }

    pub fn current(&self) -> u32 {
        *self.count.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<u32> {
        self.count.subscribe()
    }

    pub async fn refresh(&self) -> Result<u32, MessagingError> {
        let total = self.directory.unread_total(self.account_id, self.role).await?;
        self.count.send_replace(total);
        Ok(total)
    }

    /// Refresh whenever a signal for this badge's role arrives. The task ends
    /// when the bus is dropped; abort the handle to stop it sooner.
    pub fn listen(self: Arc<Self>, signals: &UnreadSignalBus) -> JoinHandle<()> {
        let mut rx = signals.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(signal) if signal.role == self.role => {
                        debug!("Unread signal for {} in {}", signal.role, signal.conversation_id);
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Unread badge missed {} signals, refreshing", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
                if let Err(e) = self.refresh().await {
                    warn!("Unread badge refresh failed: {}", e);
                }
            }
        })
    }
}
