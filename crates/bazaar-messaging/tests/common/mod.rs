//! Shared fixtures: an in-memory service wrapped with knobs for counting,
//! failing and holding requests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bazaar_db::Database;
use bazaar_db::models::NewProfile;
use bazaar_messaging::backend::{
    Backend, BackendError, EventFilter, Filter, Mutation, Query, Row, Subscription, Table,
};
use bazaar_messaging::{LocalBackend, MessagingConfig, MessagingContext, Session, SessionStore};
use bazaar_types::models::{Conversation, Message};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("bazaar_messaging=debug")
        .with_test_writer()
        .try_init();
}

/// [`LocalBackend`] plus request counters, injected failures and gates that
/// hold a conversation's message reads until released.
///
/// A plain [`gate`](ScriptedBackend::gate) parks the read before it touches
/// storage; [`gate_replies`](ScriptedBackend::gate_replies) reads first and
/// parks the reply, so the page is older than the moment it is delivered.
pub struct ScriptedBackend {
    inner: LocalBackend,
    message_queries: AtomicUsize,
    profile_queries: AtomicUsize,
    failing_message_queries: AtomicUsize,
    failing_inserts: AtomicUsize,
    failing_conversation_queries: AtomicUsize,
    failing_calls: Mutex<HashMap<String, usize>>,
    gates: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
    reply_gates: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
    held: AtomicUsize,
    after_stamp: Mutex<Option<Row>>,
}

impl ScriptedBackend {
    pub fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            message_queries: AtomicUsize::new(0),
            profile_queries: AtomicUsize::new(0),
            failing_message_queries: AtomicUsize::new(0),
            failing_inserts: AtomicUsize::new(0),
            failing_conversation_queries: AtomicUsize::new(0),
            failing_calls: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            reply_gates: Mutex::new(HashMap::new()),
            held: AtomicUsize::new(0),
            after_stamp: Mutex::new(None),
        }
    }

    pub fn local(&self) -> &LocalBackend {
        &self.inner
    }

    pub fn database(&self) -> &Database {
        self.inner.database()
    }

    pub fn message_queries(&self) -> usize {
        self.message_queries.load(Ordering::SeqCst)
    }

    pub fn profile_queries(&self) -> usize {
        self.profile_queries.load(Ordering::SeqCst)
    }

    /// Fail the next `n` message reads with a server error.
    pub fn fail_message_queries(&self, n: usize) {
        self.failing_message_queries.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` inserts with a server error.
    pub fn fail_inserts(&self, n: usize) {
        self.failing_inserts.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` conversation reads with a server error.
    pub fn fail_conversation_queries(&self, n: usize) {
        self.failing_conversation_queries.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` calls to `procedure` with a server error.
    pub fn fail_calls(&self, procedure: &str, n: usize) {
        self.failing_calls.lock().unwrap().insert(procedure.to_string(), n);
    }

    /// Hold message reads for `conversation_id` until [`release`] is called.
    pub fn gate(&self, conversation_id: Uuid) {
        self.gates
            .lock()
            .unwrap()
            .insert(conversation_id, Arc::new(Semaphore::new(0)));
    }

    /// Run message reads for `conversation_id` right away but hold their
    /// replies until [`release`] is called.
    pub fn gate_replies(&self, conversation_id: Uuid) {
        self.reply_gates
            .lock()
            .unwrap()
            .insert(conversation_id, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, conversation_id: Uuid) {
        for gates in [&self.gates, &self.reply_gates] {
            if let Some(gate) = gates.lock().unwrap().remove(&conversation_id) {
                gate.close();
            }
        }
    }

    /// Reads currently parked on a gate.
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Insert `row` into messages right after the next read-stamp update,
    /// simulating a message that lands mid-way through marking read.
    pub fn insert_after_stamp(&self, row: Row) {
        *self.after_stamp.lock().unwrap() = Some(row);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_call_failure(&self, procedure: &str) -> bool {
        match self.failing_calls.lock().unwrap().get_mut(procedure) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    async fn park(&self, gate: Option<Arc<Semaphore>>) {
        if let Some(gate) = gate {
            self.held.fetch_add(1, Ordering::SeqCst);
            let permit = gate.acquire().await;
            self.held.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        }
    }
}

fn conversation_filter(filters: &[Filter]) -> Option<Uuid> {
    filters.iter().find_map(|f| match f {
        Filter::Eq { column, value } if column == "conversation_id" => {
            value.as_str().and_then(|s| Uuid::parse_str(s).ok())
        }
        _ => None,
    })
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn query(&self, query: Query) -> Result<Vec<Row>, BackendError> {
        match query.table {
            Table::Profiles => {
                self.profile_queries.fetch_add(1, Ordering::SeqCst);
            }
            Table::Messages => {
                self.message_queries.fetch_add(1, Ordering::SeqCst);
                let conversation = conversation_filter(&query.filters);
                let gate = conversation.and_then(|id| self.gates.lock().unwrap().get(&id).cloned());
                self.park(gate).await;
                if Self::take_failure(&self.failing_message_queries) {
                    return Err(BackendError::new("XX000", "injected failure"));
                }

                let reply_gate = conversation.and_then(|id| self.reply_gates.lock().unwrap().get(&id).cloned());
                if reply_gate.is_some() {
                    let rows = self.inner.query(query).await;
                    self.park(reply_gate).await;
                    return rows;
                }
            }
            Table::Conversations => {
                if Self::take_failure(&self.failing_conversation_queries) {
                    return Err(BackendError::new("XX000", "injected failure"));
                }
            }
        }
        self.inner.query(query).await
    }

    async fn mutate(&self, mutation: Mutation) -> Result<Vec<Row>, BackendError> {
        let stamping = matches!(
            &mutation,
            Mutation::Update { table: Table::Messages, set, .. } if set.contains_key("read_at")
        );
        if matches!(mutation, Mutation::Insert { .. }) && Self::take_failure(&self.failing_inserts) {
            return Err(BackendError::new("XX000", "injected failure"));
        }

        let rows = self.inner.mutate(mutation).await?;

        if stamping {
            let late = self.after_stamp.lock().unwrap().take();
            if let Some(row) = late {
                self.inner
                    .mutate(Mutation::Insert {
                        table: Table::Messages,
                        row,
                    })
                    .await?;
            }
        }
        Ok(rows)
    }

    async fn call(&self, procedure: &str, args: Value) -> Result<Value, BackendError> {
        if self.take_call_failure(procedure) {
            return Err(BackendError::new("XX000", "injected failure"));
        }
        self.inner.call(procedure, args).await
    }

    async fn subscribe(&self, channel: &str, filter: EventFilter) -> Result<Subscription, BackendError> {
        self.inner.subscribe(channel, filter).await
    }
}

/// A marketplace with one customer and two businesses.
pub struct Harness {
    pub backend: Arc<ScriptedBackend>,
    pub customer: Uuid,
    pub bakery: Uuid,
    pub florist: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(LocalBackend::new(Database::open_in_memory().unwrap()))
    }

    pub fn without_procedures(names: &[&str]) -> Self {
        Self::with_backend(LocalBackend::new(Database::open_in_memory().unwrap()).without_procedures(names))
    }

    fn with_backend(local: LocalBackend) -> Self {
        init_tracing();
        let harness = Self {
            backend: Arc::new(ScriptedBackend::new(local)),
            customer: Uuid::new_v4(),
            bakery: Uuid::new_v4(),
            florist: Uuid::new_v4(),
        };
        harness.profile(harness.customer, Some("Dana Reyes"), None);
        harness.profile(harness.bakery, Some("Sam Ortiz"), Some("Corner Bakery"));
        harness.profile(harness.florist, None, Some("Petal & Stem"));
        harness
    }

    pub fn profile(&self, id: Uuid, full_name: Option<&str>, business_name: Option<&str>) {
        let id = id.to_string();
        self.backend
            .database()
            .upsert_profile(&NewProfile {
                id: &id,
                full_name,
                business_name,
                avatar_url: None,
            })
            .unwrap();
    }

    pub fn config() -> MessagingConfig {
        MessagingConfig {
            request_timeout: Duration::from_secs(5),
            initial_load_retry_delay: Duration::from_millis(10),
            ..MessagingConfig::default()
        }
    }

    /// A client signed in as `user`.
    pub fn client(&self, user: Uuid) -> MessagingContext {
        self.client_with(user, Self::config())
    }

    pub fn client_with(&self, user: Uuid, config: MessagingConfig) -> MessagingContext {
        let session = SessionStore::signed_in(Session {
            user_id: user,
            access_token: format!("token-{}", user),
        });
        MessagingContext::new(self.backend.clone(), session, config)
    }

    /// The conversation between the customer and `business`, created if
    /// needed.
    pub async fn conversation(&self, business: Uuid) -> Conversation {
        let directory = self.client(self.customer).directory();
        let id = directory.open_conversation(self.customer, business).await.unwrap();
        self.reload(id)
    }

    pub fn reload(&self, conversation_id: Uuid) -> Conversation {
        let rows = self
            .backend
            .database()
            .select_rows(
                Table::Conversations,
                &[Filter::eq("id", conversation_id)],
                None,
                None,
            )
            .unwrap();
        serde_json::from_value(Value::Object(rows.into_iter().next().unwrap())).unwrap()
    }

    pub fn messages(&self, conversation_id: Uuid) -> Vec<Message> {
        let rows = self
            .backend
            .database()
            .select_rows(
                Table::Messages,
                &[Filter::eq("conversation_id", conversation_id)],
                None,
                None,
            )
            .unwrap();
        rows.into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)).unwrap())
            .collect()
    }

    /// Write `count` messages straight to storage, bypassing realtime.
    pub fn seed(&self, conversation: &Conversation, from: Uuid, count: usize) -> Vec<Message> {
        let to = if from == conversation.party_a_id {
            conversation.party_b_id
        } else {
            conversation.party_a_id
        };
        (0..count)
            .map(|i| {
                let row = self
                    .backend
                    .database()
                    .insert_row(Table::Messages, &message_row(conversation.id, from, to, &format!("seed {}", i)))
                    .unwrap();
                serde_json::from_value(Value::Object(row)).unwrap()
            })
            .collect()
    }

    /// Send through the service so realtime subscribers see it.
    pub async fn deliver(&self, conversation: &Conversation, from: Uuid, body: &str) -> Message {
        let to = if from == conversation.party_a_id {
            conversation.party_b_id
        } else {
            conversation.party_a_id
        };
        let rows = self
            .backend
            .local()
            .mutate(Mutation::Insert {
                table: Table::Messages,
                row: message_row(conversation.id, from, to, body),
            })
            .await
            .unwrap();
        serde_json::from_value(Value::Object(rows.into_iter().next().unwrap())).unwrap()
    }
}

pub fn message_row(conversation_id: Uuid, from: Uuid, to: Uuid, body: &str) -> Row {
    match json!({
        "conversation_id": conversation_id,
        "sender_id": from,
        "recipient_id": to,
        "body": body,
    }) {
        Value::Object(row) => row,
        _ => unreachable!(),
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
