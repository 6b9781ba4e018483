//! The open-thread surface: one conversation at a time, its accumulated
//! messages, live updates, older-page loading and the send draft.
//!
//! Every piece of asynchronous work started for a conversation is tied to
//! that conversation's cancellation token and epoch. Switching away cancels
//! the token and bumps the epoch, so a late response or live event from the
//! previous conversation can never reach the new one's state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bazaar_types::api::SendMessageRequest;
use bazaar_types::models::{Conversation, Message, Role};
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::MessagingContext;
use crate::error::{MessagingError, Outcome};
use crate::lifecycle::{RequestId, RequestSlot, abortable, retry_once};
use crate::pagination::Page;
use crate::realtime::MessageFeed;
use crate::receipts::ReadReceipts;
use crate::timeline::Timeline;

#[derive(Debug, Clone, PartialEq)]
pub enum ThreadStatus {
    Idle,
    Loading,
    Ready,
    LoadingOlder,
    Errored(MessagingError),
}

/// Point-in-time copy of the view for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSnapshot {
    pub conversation_id: Option<Uuid>,
    pub status: ThreadStatus,
    pub messages: Vec<Message>,
    pub has_more: bool,
    /// Set when the last "load older" failed; what is shown stays intact.
    pub older_error: Option<MessagingError>,
    pub send_error: Option<MessagingError>,
    pub draft: String,
    /// Whether live updates are attached.
    pub live: bool,
}

struct ViewState {
    conversation: Option<Conversation>,
    epoch: u64,
    status: ThreadStatus,
    timeline: Timeline,
    has_more: bool,
    older_error: Option<MessagingError>,
    send_error: Option<MessagingError>,
    draft: String,
    live: bool,
}

impl ViewState {
    fn new() -> Self {
        Self {
            conversation: None,
            epoch: 0,
            status: ThreadStatus::Idle,
            timeline: Timeline::new(),
            has_more: false,
            older_error: None,
            send_error: None,
            draft: String::new(),
            live: false,
        }
    }
}

/// Work owned by the currently open conversation.
struct Attachment {
    epoch: u64,
    cancel: CancellationToken,
    feed: Option<JoinHandle<()>>,
    /// Shared thread loads started before this mark may predate the feed.
    loads_since: u64,
}

impl Attachment {
    fn release(self) {
        self.cancel.cancel();
        if let Some(feed) = self.feed {
            feed.abort();
        }
    }
}

pub struct ConversationView {
    ctx: MessagingContext,
    role: Role,
    slot: RequestSlot,
    state: Arc<Mutex<ViewState>>,
    attachment: Mutex<Option<Attachment>>,
}

fn lock_state(state: &Mutex<ViewState>) -> MutexGuard<'_, ViewState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConversationView {
    /// A view for the signed-in user acting as `role`.
    pub fn new(ctx: MessagingContext, role: Role) -> Self {
        Self {
            ctx,
            role,
            slot: RequestSlot::new(),
            state: Arc::new(Mutex::new(ViewState::new())),
            attachment: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        let state = lock_state(&self.state);
        ThreadSnapshot {
            conversation_id: state.conversation.as_ref().map(|c| c.id),
            status: state.status.clone(),
            messages: state.timeline.messages().to_vec(),
            has_more: state.has_more,
            older_error: state.older_error.clone(),
            send_error: state.send_error.clone(),
            draft: state.draft.clone(),
            live: state.live,
        }
    }

    /// Switch to `conversation`: tear down whatever the previous one had
    /// running, attach live updates, then load the newest page.
    ///
    /// Returns `Aborted` if a later switch or refresh superseded this one
    /// before it committed.
    pub async fn open(&self, conversation: &Conversation) -> Outcome<()> {
        let viewer = match self.ctx.session().require() {
            Ok(session) => session.user_id,
            Err(e) => return Outcome::Failed(e),
        };
        if conversation.party_id(self.role) != viewer {
            return Outcome::Failed(MessagingError::InvalidInput(format!(
                "not the {} in conversation {}",
                self.role, conversation.id
            )));
        }

        let conversation_id = conversation.id;
        let (epoch, cancel) = self.switch(Some(conversation.clone()));
        let request = self.slot.issue();
        info!(
            "Opening conversation {} as {} (request {})",
            conversation_id,
            self.role,
            request.get()
        );

        // Subscribe before fetching: an insert committed between the two is
        // then seen by the feed even if the page misses it.
        match abortable(&cancel, self.ctx.realtime().attach(conversation_id)).await {
            Ok(feed) => self.spawn_feed(feed, epoch, viewer, &cancel),
            Err(MessagingError::Aborted) => return Outcome::Aborted,
            Err(e) => warn!("Live updates unavailable for {}: {}", conversation_id, e),
        }
        self.arm_loads(epoch);

        self.load_newest(conversation_id, epoch, request, &cancel).await
    }

    /// Reload the newest page of the open conversation, keeping what is
    /// already shown.
    pub async fn refresh(&self) -> Outcome<()> {
        let Some((conversation_id, epoch, cancel)) = self.current() else {
            return Outcome::Ok(());
        };
        {
            let mut state = lock_state(&self.state);
            if state.epoch != epoch {
                return Outcome::Aborted;
            }
            if matches!(state.status, ThreadStatus::Errored(_)) {
                state.status = ThreadStatus::Loading;
            }
        }
        let request = self.slot.issue();
        debug!("Refreshing {} (request {})", conversation_id, request.get());
        self.load_newest(conversation_id, epoch, request, &cancel).await
    }

    /// Fetch the page before the oldest message shown. A no-op when nothing
    /// is shown, the start of the thread was reached, or another load is
    /// running. Returns how many messages were added.
    pub async fn load_older(&self) -> Outcome<usize> {
        let Some((conversation_id, epoch, cancel)) = self.current() else {
            return Outcome::Ok(0);
        };
        let cursor = {
            let mut state = lock_state(&self.state);
            if state.epoch != epoch || state.status != ThreadStatus::Ready || !state.has_more {
                return Outcome::Ok(0);
            }
            let Some(cursor) = state.timeline.oldest_timestamp() else {
                return Outcome::Ok(0);
            };
            state.status = ThreadStatus::LoadingOlder;
            state.older_error = None;
            cursor
        };

        let result = abortable(&cancel, self.ctx.pager().fetch_page(conversation_id, Some(cursor))).await;

        let mut state = lock_state(&self.state);
        if state.epoch != epoch {
            return Outcome::Aborted;
        }
        state.status = ThreadStatus::Ready;
        match result {
            Ok(page) => {
                let added = state.timeline.merge_all(page.messages);
                state.has_more = page.has_more;
                debug!("Loaded {} older messages in {}", added, conversation_id);
                Outcome::Ok(added)
            }
            Err(MessagingError::Aborted) => Outcome::Aborted,
            Err(e) => {
                warn!("Loading older messages in {} failed: {}", conversation_id, e);
                state.older_error = Some(e.clone());
                Outcome::Failed(e)
            }
        }
    }

    /// Send `body` to the counterpart. The draft holds `body` until the send
    /// succeeds, so a failure leaves it for the user to retry.
    pub async fn send(&self, body: &str) -> Outcome<Message> {
        let Some((conversation_id, epoch, cancel)) = self.current() else {
            return Outcome::Failed(MessagingError::InvalidInput("no conversation is open".into()));
        };
        let recipient_id = {
            let mut state = lock_state(&self.state);
            let recipient = match &state.conversation {
                Some(c) if state.epoch == epoch => c.counterpart_id(self.role),
                _ => return Outcome::Aborted,
            };
            state.draft = body.to_string();
            state.send_error = None;
            recipient
        };

        let request = SendMessageRequest {
            conversation_id,
            recipient_id,
            body: body.to_string(),
        };
        let result = abortable(&cancel, self.ctx.outbox().send(request)).await;

        let mut state = lock_state(&self.state);
        if state.epoch != epoch {
            // Persisted or not, it no longer belongs to what is shown
            return result.into();
        }
        match result {
            Ok(message) => {
                state.timeline.merge(message.clone());
                state.draft.clear();
                Outcome::Ok(message)
            }
            Err(MessagingError::Aborted) => Outcome::Aborted,
            Err(e) => {
                state.send_error = Some(e.clone());
                Outcome::Failed(e)
            }
        }
    }

    /// Leave the current conversation, cancelling everything it started.
    pub fn close(&self) {
        self.switch(None);
    }

    fn current(&self) -> Option<(Uuid, u64, CancellationToken)> {
        let attachment = self.attachment.lock().unwrap_or_else(PoisonError::into_inner);
        let attachment = attachment.as_ref()?;
        let state = lock_state(&self.state);
        let conversation = state.conversation.as_ref()?;
        (state.epoch == attachment.epoch).then(|| (conversation.id, attachment.epoch, attachment.cancel.clone()))
    }

    fn switch(&self, next: Option<Conversation>) -> (u64, CancellationToken) {
        let opening = next.is_some();
        let epoch = {
            let mut state = lock_state(&self.state);
            let epoch = state.epoch + 1;
            *state = ViewState {
                conversation: next,
                epoch,
                status: if opening {
                    ThreadStatus::Loading
                } else {
                    ThreadStatus::Idle
                },
                ..ViewState::new()
            };
            epoch
        };
        self.slot.invalidate();

        let cancel = CancellationToken::new();
        let replacement = opening.then(|| Attachment {
            epoch,
            cancel: cancel.clone(),
            feed: None,
            loads_since: u64::MAX,
        });
        let previous = std::mem::replace(
            &mut *self.attachment.lock().unwrap_or_else(PoisonError::into_inner),
            replacement,
        );
        if let Some(previous) = previous {
            debug!("Releasing work for epoch {}", previous.epoch);
            previous.release();
        }
        (epoch, cancel)
    }

    async fn load_newest(
        &self,
        conversation_id: Uuid,
        epoch: u64,
        request: RequestId,
        cancel: &CancellationToken,
    ) -> Outcome<()> {
        let since = self.loads_since(epoch);
        let result = abortable(cancel, self.fetch_newest(conversation_id, since)).await;

        if !self.slot.is_current(request) {
            debug!("Discarding stale load of {} (request {})", conversation_id, request.get());
            return Outcome::Aborted;
        }
        let mut state = lock_state(&self.state);
        if state.epoch != epoch {
            return Outcome::Aborted;
        }
        match result {
            Ok(page) => {
                state.timeline.merge_all(page.messages);
                state.has_more = page.has_more;
                state.status = ThreadStatus::Ready;
                drop(state);
                spawn_receipt(self.ctx.receipts(self.role), conversation_id, cancel.clone());
                Outcome::Ok(())
            }
            Err(MessagingError::Aborted) => Outcome::Aborted,
            Err(e) => {
                warn!("Loading {} failed: {}", conversation_id, e);
                state.status = ThreadStatus::Errored(e.clone());
                Outcome::Failed(e)
            }
        }
    }

    /// The newest page, retried once on a retryable failure. Shared with
    /// other views loading the same thread, but only through a load that
    /// started after this view's live feed was attached: an older one may
    /// have read before a message this feed never saw.
    async fn fetch_newest(&self, conversation_id: Uuid, since: u64) -> Result<Page, MessagingError> {
        let pager = self.ctx.pager();
        let delay = self.ctx.config().initial_load_retry_delay;
        self.ctx
            .thread_loads()
            .run(conversation_id, since, move || {
                async move { retry_once(delay, "thread load", || pager.fetch_page(conversation_id, None)).await }
                    .boxed()
            })
            .await
    }

    /// Record which shared loads this epoch may join: those started from
    /// now on, with the feed already attached.
    fn arm_loads(&self, epoch: u64) {
        let mark = self.ctx.thread_loads().mark();
        let mut attachment = self.attachment.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = attachment.as_mut().filter(|a| a.epoch == epoch) {
            current.loads_since = mark;
        }
    }

    fn loads_since(&self, epoch: u64) -> u64 {
        self.attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|a| a.epoch == epoch)
            .map_or(u64::MAX, |a| a.loads_since)
    }

    fn spawn_feed(&self, feed: MessageFeed, epoch: u64, viewer: Uuid, cancel: &CancellationToken) {
        let handle = tokio::spawn(run_feed(
            feed,
            self.state.clone(),
            epoch,
            viewer,
            self.ctx.receipts(self.role),
            cancel.clone(),
        ));

        let mut attachment = self.attachment.lock().unwrap_or_else(PoisonError::into_inner);
        match attachment.as_mut() {
            Some(current) if current.epoch == epoch => current.feed = Some(handle),
            _ => {
                handle.abort();
                return;
            }
        }
        drop(attachment);

        let mut state = lock_state(&self.state);
        if state.epoch == epoch {
            state.live = true;
        }
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        let attachment = self.attachment.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(attachment) = attachment {
            attachment.release();
        }
    }
}

async fn run_feed(
    mut feed: MessageFeed,
    state: Arc<Mutex<ViewState>>,
    epoch: u64,
    viewer: Uuid,
    receipts: ReadReceipts,
    cancel: CancellationToken,
) {
    let conversation_id = feed.conversation_id();
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            next = feed.next_message() => match next {
                Some(message) => message,
                None => break,
            },
        };

        let to_viewer = message.recipient_id == viewer;
        let message_id = message.id;
        {
            let mut state = lock_state(&state);
            if state.epoch != epoch {
                break;
            }
            if !state.timeline.merge(message) {
                debug!("Live copy of {} already shown", message_id);
                continue;
            }
        }
        if to_viewer {
            spawn_receipt(receipts.clone(), conversation_id, cancel.clone());
        }
    }

    let mut state = lock_state(&state);
    if state.epoch == epoch {
        state.live = false;
    }
    debug!("Live feed for {} stopped", conversation_id);
}

/// Best effort: a failed receipt is logged, never surfaced.
fn spawn_receipt(receipts: ReadReceipts, conversation_id: Uuid, cancel: CancellationToken) {
    tokio::spawn(async move {
        match abortable(&cancel, receipts.mark_read(conversation_id)).await {
            Ok(_) | Err(MessagingError::Aborted) => {}
            Err(e) => warn!("Read receipt for {} failed: {}", conversation_id, e),
        }
    });
}
