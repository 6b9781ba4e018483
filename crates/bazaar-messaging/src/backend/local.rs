use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bazaar_db::{Database, sql_state};
use bazaar_types::api::{
    GET_OR_CREATE_CONVERSATION, GetOrCreateConversationArgs, MARK_CONVERSATION_READ,
    MarkConversationReadArgs, UNREAD_TOTAL, UnreadTotalArgs,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error};

use super::hub::RealtimeHub;
use super::{Backend, BackendError, ChangeEvent, ChangeKind, EventFilter, Mutation, Query, Row, Subscription};

/// In-process data service over SQLite, with a realtime feed of row inserts
/// and updates. Procedures can be marked as not deployed to exercise the
/// client-side fallbacks.
pub struct LocalBackend {
    db: Arc<Database>,
    hub: RealtimeHub,
    undeployed: HashSet<String>,
}

impl LocalBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            hub: RealtimeHub::new(),
            undeployed: HashSet::new(),
        }
    }

    /// Behave as if the named procedures were never deployed.
    pub fn without_procedures(mut self, names: &[&str]) -> Self {
        self.undeployed.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Realtime channels currently open against this backend.
    pub fn active_channels(&self) -> Vec<String> {
        self.hub.active_channels()
    }

    /// Run blocking DB work off the async runtime
    async fn blocking<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                BackendError::new("XX000", format!("database worker failed: {}", e))
            })?
            .map_err(|e| BackendError::new(sql_state(&e), e.to_string()))
    }
}

fn missing_procedure(name: &str) -> BackendError {
    BackendError::new(
        "PGRST202",
        format!("Could not find the function public.{} in the schema cache", name),
    )
}

fn parse_args<T: DeserializeOwned>(procedure: &str, args: Value) -> Result<T, BackendError> {
    serde_json::from_value(args)
        .map_err(|e| BackendError::new("22023", format!("invalid arguments for {}: {}", procedure, e)))
}

#[async_trait]
impl Backend for LocalBackend {
    async fn query(&self, query: Query) -> Result<Vec<Row>, BackendError> {
        self.blocking(move |db| {
            db.select_rows(query.table, &query.filters, query.order.as_ref(), query.limit)
        })
        .await
    }

    async fn mutate(&self, mutation: Mutation) -> Result<Vec<Row>, BackendError> {
        let table = mutation.table();
        let (kind, rows) = match mutation {
            Mutation::Insert { table, row } => {
                let row = self.blocking(move |db| db.insert_row(table, &row)).await?;
                (ChangeKind::Insert, vec![row])
            }
            Mutation::Upsert { table, row } => {
                let row = self.blocking(move |db| db.upsert_row(table, &row)).await?;
                (ChangeKind::Insert, row.into_iter().collect())
            }
            Mutation::Update { table, filters, set } => {
                let rows = self
                    .blocking(move |db| db.update_rows(table, &filters, &set))
                    .await?;
                (ChangeKind::Update, rows)
            }
        };

        for row in &rows {
            self.hub.publish(ChangeEvent {
                table,
                kind,
                row: row.clone(),
                committed_at: Utc::now(),
            });
        }
        Ok(rows)
    }

    async fn call(&self, procedure: &str, args: Value) -> Result<Value, BackendError> {
        if self.undeployed.contains(procedure) {
            debug!("Procedure {} requested but not deployed", procedure);
            return Err(missing_procedure(procedure));
        }

        match procedure {
            GET_OR_CREATE_CONVERSATION => {
                let args: GetOrCreateConversationArgs = parse_args(procedure, args)?;
                let id = self
                    .blocking(move |db| {
                        db.get_or_create_conversation(&args.party_a.to_string(), &args.party_b.to_string())
                    })
                    .await?;
                Ok(Value::String(id))
            }
            MARK_CONVERSATION_READ => {
                let args: MarkConversationReadArgs = parse_args(procedure, args)?;
                self.blocking(move |db| {
                    db.mark_conversation_read(&args.conversation_id.to_string(), &args.user_id.to_string())
                })
                .await?;
                Ok(Value::Null)
            }
            UNREAD_TOTAL => {
                let args: UnreadTotalArgs = parse_args(procedure, args)?;
                let total = self
                    .blocking(move |db| db.unread_total(args.role, &args.account_id.to_string()))
                    .await?;
                Ok(json!(total))
            }
            other => Err(missing_procedure(other)),
        }
    }

    async fn subscribe(&self, channel: &str, filter: EventFilter) -> Result<Subscription, BackendError> {
        Ok(self.hub.subscribe(channel, filter))
    }
}
