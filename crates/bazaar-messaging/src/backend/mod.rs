//! The data-service capability the messaging core is written against.
//!
//! Everything above this module talks to `dyn Backend` only, so the hosted
//! service, the local SQLite stand-in, and test doubles are interchangeable.

mod hub;
pub mod local;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use bazaar_types::events::{ChangeEvent, ChangeKind, EventFilter};
pub use bazaar_types::query::{Filter, Mutation, Order, Query, Table};
pub use local::LocalBackend;

use crate::error::MessagingError;

pub type Row = Map<String, Value>;

/// Error as reported by the data service: a SQLSTATE-like code plus text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({code})")]
pub struct BackendError {
    pub code: String,
    pub message: String,
}

impl BackendError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Read rows from a table.
    async fn query(&self, query: Query) -> Result<Vec<Row>, BackendError>;

    /// Write rows. Returns the rows as persisted.
    async fn mutate(&self, mutation: Mutation) -> Result<Vec<Row>, BackendError>;

    /// Invoke a named server-side procedure.
    async fn call(&self, procedure: &str, args: Value) -> Result<Value, BackendError>;

    /// Open a realtime channel. Events are filtered server-side by `filter`.
    async fn subscribe(&self, channel: &str, filter: EventFilter) -> Result<Subscription, BackendError>;
}

/// A live realtime channel. Dropping it tears the channel down.
pub struct Subscription {
    channel: String,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    closed: CancellationToken,
}

impl Subscription {
    pub fn new(
        channel: impl Into<String>,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            channel: channel.into(),
            events,
            closed,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event, or `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        if self.closed.is_cancelled() {
            return None;
        }
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

pub(crate) fn decode_rows<T: DeserializeOwned>(what: &str, rows: Vec<Row>) -> Result<Vec<T>, MessagingError> {
    rows.into_iter().map(|row| decode_row(what, row)).collect()
}

pub(crate) fn decode_row<T: DeserializeOwned>(what: &str, row: Row) -> Result<T, MessagingError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| MessagingError::decode(what, e))
}

pub(crate) fn encode_args<T: Serialize>(procedure: &str, args: &T) -> Result<Value, MessagingError> {
    serde_json::to_value(args)
        .map_err(|e| MessagingError::InvalidInput(format!("bad arguments for {}: {}", procedure, e)))
}
