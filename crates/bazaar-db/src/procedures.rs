//! Server-side procedures. Each runs inside one transaction, which is what
//! makes them safe to call concurrently from many clients.

use anyhow::Result;
use bazaar_types::models::Role;
use bazaar_types::timestamp;
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::queries::OptionalExt;
use crate::{Database, DbError};

impl Database {
    /// Return the conversation between the two parties, creating it if
    /// needed. The pair is unordered: (a, b) and (b, a) are the same thread.
    pub fn get_or_create_conversation(&self, party_a: &str, party_b: &str) -> Result<String> {
        if party_a == party_b {
            return Err(DbError::InvalidValue {
                column: "party_b_id".into(),
                reason: "a conversation needs two distinct parties".into(),
            }
            .into());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(id) = find_pair(&tx, party_a, party_b)? {
                tx.commit()?;
                return Ok(id);
            }

            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT OR IGNORE INTO conversations (id, party_a_id, party_b_id) VALUES (?1, ?2, ?3)",
                (&id, party_a, party_b),
            )?;
            let id = find_pair(&tx, party_a, party_b)?
                .ok_or_else(|| DbError::ConversationNotFound(id.clone()))?;

            tx.commit()?;
            debug!("Conversation {} ready for {} / {}", id, party_a, party_b);
            Ok(id)
        })
    }

    /// Zero `user_id`'s unread counter and stamp `read_at` on every message
    /// addressed to them. Returns how many messages were newly marked.
    pub fn mark_conversation_read(&self, conversation_id: &str, user_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let (party_a, party_b): (String, String) = tx
                .query_row(
                    "SELECT party_a_id, party_b_id FROM conversations WHERE id = ?1",
                    [conversation_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| DbError::ConversationNotFound(conversation_id.to_string()))?;

            let column = if user_id == party_a {
                Role::Customer.unread_column()
            } else if user_id == party_b {
                Role::Business.unread_column()
            } else {
                return Err(DbError::NotParticipant {
                    conversation_id: conversation_id.to_string(),
                    user_id: user_id.to_string(),
                }
                .into());
            };

            let now = timestamp::format(timestamp::now());
            let marked = tx.execute(
                "UPDATE messages SET read_at = ?1
                 WHERE conversation_id = ?2 AND recipient_id = ?3 AND read_at IS NULL",
                (&now, conversation_id, user_id),
            )?;
            tx.execute(
                &format!("UPDATE conversations SET {} = 0 WHERE id = ?1", column),
                [conversation_id],
            )?;

            tx.commit()?;
            Ok(marked)
        })
    }

    /// Sum of `account_id`'s unread counters across every conversation where
    /// they hold `role`.
    pub fn unread_total(&self, role: Role, account_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!(
                    "SELECT COALESCE(SUM({}), 0) FROM conversations WHERE {} = ?1",
                    role.unread_column(),
                    role.party_column()
                ),
                [account_id],
                |row| row.get(0),
            )?;
            Ok(total.max(0) as u64)
        })
    }
}

fn find_pair(conn: &Connection, party_a: &str, party_b: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM conversations
         WHERE min(party_a_id, party_b_id) = min(?1, ?2)
           AND max(party_a_id, party_b_id) = max(?1, ?2)",
        [party_a, party_b],
        |row| row.get(0),
    )
    .optional()
}
