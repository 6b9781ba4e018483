use std::sync::Arc;
use std::time::Duration;

use bazaar_types::models::Message;
use bazaar_types::timestamp;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{Backend, Filter, Query, Table, decode_rows};
use crate::error::MessagingError;
use crate::lifecycle::timed;

/// One page of a thread, oldest message first.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub messages: Vec<Message>,
    /// A full page means older messages may exist; a short one means the
    /// start of the thread was reached.
    pub has_more: bool,
}

/// Cursor-based message retrieval. Stateless: the caller owns whatever it
/// has accumulated and passes the oldest timestamp back as the cursor.
#[derive(Clone)]
pub struct MessagePager {
    backend: Arc<dyn Backend>,
    page_size: u32,
    timeout: Duration,
}

impl MessagePager {
    pub fn new(backend: Arc<dyn Backend>, page_size: u32, timeout: Duration) -> Self {
        Self {
            backend,
            page_size,
            timeout,
        }
    }

    /// Newest page when `before` is `None`, otherwise the page strictly older
    /// than `before`.
    pub async fn fetch_page(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
    ) -> Result<Page, MessagingError> {
        let mut query = Query::from(Table::Messages).filter(Filter::eq("conversation_id", conversation_id));
        if let Some(cursor) = before {
            query = query.filter(Filter::lt("created_at", timestamp::format(cursor)));
        }
        let query = query.order_desc("created_at").limit(self.page_size);

        let rows = timed(self.timeout, self.backend.query(query)).await?;
        let mut messages: Vec<Message> = decode_rows("message", rows)?;
        // Fetched newest-first so the limit keeps the most recent rows
        messages.reverse();

        debug!(
            "Fetched {} messages for {} (before {:?})",
            messages.len(),
            conversation_id,
            before
        );
        Ok(Page {
            has_more: has_more(messages.len(), self.page_size),
            messages,
        })
    }
}

pub fn has_more(fetched: usize, page_size: u32) -> bool {
    fetched as u64 >= page_size as u64
}
