//! The inbox: which conversations an account participates in, decorated
//! with the counterpart's display identity and the caller's unread count.

use std::sync::Arc;
use std::time::Duration;

use bazaar_types::api::{GET_OR_CREATE_CONVERSATION, GetOrCreateConversationArgs, UNREAD_TOTAL, UnreadTotalArgs};
use bazaar_types::models::{Conversation, ConversationSummary, Counterpart, Role};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, Filter, Mutation, Query, Row, Table, decode_row, decode_rows, encode_args};
use crate::error::MessagingError;
use crate::lifecycle::timed;
use crate::profiles::ProfileLookup;

pub type LoadError = MessagingError;

#[derive(Clone)]
pub struct ConversationDirectory {
    backend: Arc<dyn Backend>,
    profiles: ProfileLookup,
    page_size: u32,
    timeout: Duration,
}

impl ConversationDirectory {
    pub fn new(backend: Arc<dyn Backend>, profiles: ProfileLookup, page_size: u32, timeout: Duration) -> Self {
        Self {
            backend,
            profiles,
            page_size,
            timeout,
        }
    }

    /// Conversations where `account_id` is the `role` party, most recently
    /// active first. Counterparts are resolved with a single batched profile
    /// lookup regardless of how many conversations come back.
    pub async fn list(&self, account_id: Uuid, role: Role) -> Result<Vec<ConversationSummary>, LoadError> {
        let query = Query::from(Table::Conversations)
            .filter(Filter::eq(role.party_column(), account_id))
            .order_desc("last_message_at")
            .limit(self.page_size);

        let rows = timed(self.timeout, self.backend.query(query))
            .await
            .inspect_err(|e| warn!("Listing conversations for {} ({}) failed: {}", account_id, role, e))?;
        let conversations: Vec<Conversation> = decode_rows("conversation", rows)?;

        let counterpart_ids: Vec<Uuid> = conversations.iter().map(|c| c.counterpart_id(role)).collect();
        let profiles = self.profiles.lookup(&counterpart_ids).await?;

        debug!(
            "Listed {} conversations for {} ({}), {} profiles resolved",
            conversations.len(),
            account_id,
            role,
            profiles.len()
        );

        Ok(conversations
            .into_iter()
            .map(|conversation| {
                let counterpart_id = conversation.counterpart_id(role);
                ConversationSummary {
                    counterpart: Counterpart::from_profile(counterpart_id, profiles.get(&counterpart_id)),
                    unread_count: conversation.unread_for(role),
                    conversation,
                }
            })
            .collect())
    }

    /// Sum of the caller's unread counters across all their conversations.
    pub async fn unread_total(&self, account_id: Uuid, role: Role) -> Result<u32, LoadError> {
        let args = encode_args(UNREAD_TOTAL, &UnreadTotalArgs { role, account_id })?;
        match timed(self.timeout, self.backend.call(UNREAD_TOTAL, args)).await {
            Ok(value) => value
                .as_u64()
                .map(clamp_count)
                .ok_or_else(|| MessagingError::ServerError(format!("{} returned {}", UNREAD_TOTAL, value))),
            Err(MessagingError::ProcedureMissing(_)) => {
                warn!("{} not deployed, summing unread counters client-side", UNREAD_TOTAL);
                self.sum_unread(account_id, role).await
            }
            Err(e) => Err(e),
        }
    }

    async fn sum_unread(&self, account_id: Uuid, role: Role) -> Result<u32, LoadError> {
        let query = Query::from(Table::Conversations).filter(Filter::eq(role.party_column(), account_id));
        let rows = timed(self.timeout, self.backend.query(query)).await?;
        let conversations: Vec<Conversation> = decode_rows("conversation", rows)?;
        let total: u64 = conversations.iter().map(|c| u64::from(c.unread_for(role))).sum();
        Ok(clamp_count(total))
    }

    /// The conversation between a customer and a business, created on first
    /// contact. Safe to race: concurrent callers all get the same id.
    pub async fn open_conversation(&self, customer_id: Uuid, business_id: Uuid) -> Result<Uuid, LoadError> {
        if customer_id == business_id {
            return Err(MessagingError::InvalidInput(
                "a conversation needs two different accounts".into(),
            ));
        }

        let args = encode_args(
            GET_OR_CREATE_CONVERSATION,
            &GetOrCreateConversationArgs {
                party_a: customer_id,
                party_b: business_id,
            },
        )?;
        match timed(self.timeout, self.backend.call(GET_OR_CREATE_CONVERSATION, args)).await {
            Ok(value) => parse_id(&value),
            Err(MessagingError::ProcedureMissing(_)) => {
                warn!("{} not deployed, creating conversation client-side", GET_OR_CREATE_CONVERSATION);
                self.upsert_conversation(customer_id, business_id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn upsert_conversation(&self, customer_id: Uuid, business_id: Uuid) -> Result<Uuid, LoadError> {
        let mut row = Row::new();
        row.insert("party_a_id".into(), Value::String(customer_id.to_string()));
        row.insert("party_b_id".into(), Value::String(business_id.to_string()));

        let mutation = Mutation::Upsert {
            table: Table::Conversations,
            row,
        };
        match timed(self.timeout, self.backend.mutate(mutation)).await {
            Ok(rows) => {
                if let Some(row) = rows.into_iter().next() {
                    let created: Conversation = decode_row("conversation", row)?;
                    info!("Created conversation {} between {} and {}", created.id, customer_id, business_id);
                    return Ok(created.id);
                }
            }
            Err(MessagingError::Conflict) => {
                debug!("Conversation {}/{} created concurrently", customer_id, business_id);
            }
            Err(e) => return Err(e),
        }

        self.find_conversation(customer_id, business_id)
            .await?
            .map(|c| c.id)
            .ok_or_else(|| MessagingError::ServerError("conversation missing after upsert".into()))
    }

    pub async fn get(&self, conversation_id: Uuid) -> Result<Option<Conversation>, LoadError> {
        let query = Query::from(Table::Conversations)
            .filter(Filter::eq("id", conversation_id))
            .limit(1);
        let rows = timed(self.timeout, self.backend.query(query)).await?;
        rows.into_iter()
            .next()
            .map(|row| decode_row("conversation", row))
            .transpose()
    }

    /// Look up the conversation for an unordered pair of accounts.
    pub async fn find_conversation(&self, first: Uuid, second: Uuid) -> Result<Option<Conversation>, LoadError> {
        for (a, b) in [(first, second), (second, first)] {
            let query = Query::from(Table::Conversations)
                .filter(Filter::eq("party_a_id", a))
                .filter(Filter::eq("party_b_id", b))
                .limit(1);
            let rows = timed(self.timeout, self.backend.query(query)).await?;
            if let Some(row) = rows.into_iter().next() {
                return decode_row("conversation", row).map(Some);
            }
        }
        Ok(None)
    }
}

fn parse_id(value: &Value) -> Result<Uuid, MessagingError> {
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| MessagingError::ServerError(format!("expected a conversation id, got {}", value)))
}

fn clamp_count(total: u64) -> u32 {
    u32::try_from(total).unwrap_or(u32::MAX)
}
