use std::sync::Arc;
use std::time::Duration;

use bazaar_types::models::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Backend, EventFilter, Filter, Subscription, Table, decode_row};
use crate::error::MessagingError;
use crate::lifecycle::timed;

/// Channel name for a conversation's message inserts. Deterministic, so
/// every surface watching the same thread names it the same way.
pub fn channel_name(conversation_id: Uuid) -> String {
    format!("conversation:{}:messages", conversation_id)
}

/// Server-side filter: inserts on `messages` for one conversation.
pub fn message_inserts(conversation_id: Uuid) -> EventFilter {
    EventFilter::inserts(Table::Messages).filter(Filter::eq("conversation_id", conversation_id))
}

#[derive(Clone)]
pub struct RealtimeLayer {
    backend: Arc<dyn Backend>,
    timeout: Duration,
}

impl RealtimeLayer {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Open the live message feed for one conversation.
    pub async fn attach(&self, conversation_id: Uuid) -> Result<MessageFeed, MessagingError> {
        let channel = channel_name(conversation_id);
        let subscription = timed(
            self.timeout,
            self.backend.subscribe(&channel, message_inserts(conversation_id)),
        )
        .await?;

        debug!("Attached realtime channel {}", channel);
        Ok(MessageFeed {
            conversation_id,
            subscription,
        })
    }
}

/// Decoded inserts for one conversation. Dropping the feed closes the
/// channel.
pub struct MessageFeed {
    conversation_id: Uuid,
    subscription: Subscription,
}

impl MessageFeed {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn channel(&self) -> &str {
        self.subscription.channel()
    }

    /// Next inserted message, or `None` once the channel closes. Rows that
    /// fail to decode or belong to another conversation are skipped.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            let event = self.subscription.next().await?;
            match decode_row::<Message>("message", event.row) {
                Ok(message) if message.conversation_id == self.conversation_id => return Some(message),
                Ok(message) => warn!(
                    "Dropping message {} for conversation {} delivered on {}",
                    message.id,
                    message.conversation_id,
                    self.channel()
                ),
                Err(e) => warn!("Dropping realtime event on {}: {}", self.channel(), e),
            }
        }
    }
}
