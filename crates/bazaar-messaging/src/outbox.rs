use std::sync::Arc;
use std::time::Duration;

use bazaar_types::api::SendMessageRequest;
use bazaar_types::models::Message;
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::{Backend, Mutation, Row, Table, decode_row};
use crate::error::MessagingError;
use crate::lifecycle::timed;
use crate::session::SessionStore;

/// Sends messages as the signed-in user. The server assigns id and
/// timestamp and maintains the conversation's preview and counters.
#[derive(Clone)]
pub struct Outbox {
    backend: Arc<dyn Backend>,
    session: SessionStore,
    timeout: Duration,
}

impl Outbox {
    pub fn new(backend: Arc<dyn Backend>, session: SessionStore, timeout: Duration) -> Self {
        Self {
            backend,
            session,
            timeout,
        }
    }

    pub async fn send(&self, request: SendMessageRequest) -> Result<Message, MessagingError> {
        let session = self.session.require()?;

        let body = request.body.trim();
        if body.is_empty() {
            return Err(MessagingError::InvalidInput("message body is empty".into()));
        }
        if request.recipient_id == session.user_id {
            return Err(MessagingError::InvalidInput("cannot send a message to yourself".into()));
        }

        let mut row = Row::new();
        row.insert("conversation_id".into(), Value::String(request.conversation_id.to_string()));
        row.insert("sender_id".into(), Value::String(session.user_id.to_string()));
        row.insert("recipient_id".into(), Value::String(request.recipient_id.to_string()));
        row.insert("body".into(), Value::String(body.to_string()));

        let rows = timed(
            self.timeout,
            self.backend.mutate(Mutation::Insert {
                table: Table::Messages,
                row,
            }),
        )
        .await
        .inspect_err(|e| warn!("Send to conversation {} failed: {}", request.conversation_id, e))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| MessagingError::ServerError("insert returned no message".into()))?;
        let message: Message = decode_row("message", row)?;

        info!("Message {} sent in {}", message.id, message.conversation_id);
        Ok(message)
    }
}
