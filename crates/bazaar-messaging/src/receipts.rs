use std::sync::Arc;
use std::time::Duration;

use bazaar_types::api::{MARK_CONVERSATION_READ, MarkConversationReadArgs};
use bazaar_types::events::UnreadSignal;
use bazaar_types::models::Role;
use bazaar_types::timestamp;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Backend, Filter, Mutation, Query, Row, Table};
use crate::error::MessagingError;
use crate::lifecycle::timed;
use crate::session::{Session, SessionStore};
use crate::signals::UnreadSignalBus;

/// Which implementation cleared the unread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptPath {
    /// The atomic server-side procedure.
    Procedure,
    /// Client-side steps, used when the procedure is not deployed.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReport {
    pub conversation_id: Uuid,
    /// Messages to the caller still unread afterwards. Only the fallback can
    /// observe a non-zero value (a message that landed mid-operation).
    pub unread: u32,
    pub path: ReceiptPath,
}

/// Marks threads read for the signed-in user acting in one role.
#[derive(Clone)]
pub struct ReadReceipts {
    backend: Arc<dyn Backend>,
    session: SessionStore,
    signals: UnreadSignalBus,
    role: Role,
    timeout: Duration,
}

impl ReadReceipts {
    pub fn new(
        backend: Arc<dyn Backend>,
        session: SessionStore,
        signals: UnreadSignalBus,
        role: Role,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            session,
            signals,
            role,
            timeout,
        }
    }

    /// Stamp every unread message addressed to the caller and zero the
    /// caller's counter, then signal other open surfaces. Idempotent.
    pub async fn mark_read(&self, conversation_id: Uuid) -> Result<ReadReport, MessagingError> {
        let session = self.session.require()?;
        let args = encode_args(conversation_id, session.user_id)?;

        let report = match timed(self.timeout, self.backend.call(MARK_CONVERSATION_READ, args)).await {
            Ok(_) => ReadReport {
                conversation_id,
                unread: 0,
                path: ReceiptPath::Procedure,
            },
            Err(MessagingError::ProcedureMissing(_)) => {
                warn!("{} not deployed, marking read client-side", MARK_CONVERSATION_READ);
                let unread = self.mark_read_fallback(&session, conversation_id).await?;
                ReadReport {
                    conversation_id,
                    unread,
                    path: ReceiptPath::Fallback,
                }
            }
            Err(e) => return Err(e),
        };

        debug!(
            "Conversation {} marked read by {} ({:?}, {} left)",
            conversation_id, session.user_id, report.path, report.unread
        );
        self.signals.publish(UnreadSignal::new(self.role, conversation_id));
        Ok(report)
    }

    async fn mark_read_fallback(&self, session: &Session, conversation_id: Uuid) -> Result<u32, MessagingError> {
        let unread_to_me = || {
            vec![
                Filter::eq("conversation_id", conversation_id),
                Filter::eq("recipient_id", session.user_id),
                Filter::is_null("read_at"),
            ]
        };

        let mut stamp = Row::new();
        stamp.insert("read_at".into(), Value::String(timestamp::format(timestamp::now())));
        let stamped = timed(
            self.timeout,
            self.backend.mutate(Mutation::Update {
                table: Table::Messages,
                filters: unread_to_me(),
                set: stamp,
            }),
        )
        .await?;

        // Recount instead of assuming zero: anything that arrived after the
        // stamp stays counted.
        let mut remaining = Query::from(Table::Messages);
        remaining.filters = unread_to_me();
        let unread = timed(self.timeout, self.backend.query(remaining)).await?.len();
        let unread = u32::try_from(unread).unwrap_or(u32::MAX);

        let mut counter = Row::new();
        counter.insert(self.role.unread_column().into(), Value::from(unread));
        timed(
            self.timeout,
            self.backend.mutate(Mutation::Update {
                table: Table::Conversations,
                filters: vec![
                    Filter::eq("id", conversation_id),
                    Filter::eq(self.role.party_column(), session.user_id),
                ],
                set: counter,
            }),
        )
        .await?;

        debug!("Stamped {} messages read in {}", stamped.len(), conversation_id);
        Ok(unread)
    }
}

fn encode_args(conversation_id: Uuid, user_id: Uuid) -> Result<Value, MessagingError> {
    crate::backend::encode_args(
        MARK_CONVERSATION_READ,
        &MarkConversationReadArgs {
            conversation_id,
            user_id,
        },
    )
}
