use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::Role;
use crate::query::{Filter, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// A row change published by the data service's realtime feed.
/// `row` is the full new row as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub row: Map<String, Value>,
    pub committed_at: DateTime<Utc>,
}

/// Server-side filter attached to a realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub table: Table,
    pub kind: ChangeKind,
    pub filters: Vec<Filter>,
}

impl EventFilter {
    pub fn inserts(table: Table) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && event.kind == self.kind
            && self.filters.iter().all(|f| f.matches(&event.row))
    }
}

/// Cross-view notification: the unread state of `conversation_id` changed
/// for `role`, so open surfaces for that role should refresh their badges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadSignal {
    pub role: Role,
    pub conversation_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl UnreadSignal {
    pub fn new(role: Role, conversation_id: Uuid) -> Self {
        Self {
            role,
            conversation_id,
            timestamp: Utc::now(),
        }
    }
}
