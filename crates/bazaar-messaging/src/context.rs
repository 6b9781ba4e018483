use std::sync::Arc;

use bazaar_types::models::Role;
use uuid::Uuid;

use crate::backend::Backend;
use crate::badge::UnreadBadge;
use crate::config::MessagingConfig;
use crate::directory::ConversationDirectory;
use crate::lifecycle::SingleFlight;
use crate::outbox::Outbox;
use crate::pagination::{MessagePager, Page};
use crate::profiles::ProfileLookup;
use crate::realtime::RealtimeLayer;
use crate::receipts::ReadReceipts;
use crate::session::SessionStore;
use crate::signals::UnreadSignalBus;

/// Everything the messaging surfaces share for one signed-in client:
/// backend handle, session, tuning, the unread signal bus and the registry
/// of in-flight thread loads. Cheap to clone.
#[derive(Clone)]
pub struct MessagingContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    backend: Arc<dyn Backend>,
    session: SessionStore,
    config: MessagingConfig,
    signals: UnreadSignalBus,
    thread_loads: SingleFlight<Uuid, Page>,
}

impl MessagingContext {
    pub fn new(backend: Arc<dyn Backend>, session: SessionStore, config: MessagingConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                backend,
                session,
                config,
                signals: UnreadSignalBus::default(),
                thread_loads: SingleFlight::new(),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.inner.config
    }

    pub fn signals(&self) -> &UnreadSignalBus {
        &self.inner.signals
    }

    pub(crate) fn thread_loads(&self) -> &SingleFlight<Uuid, Page> {
        &self.inner.thread_loads
    }

    pub fn profiles(&self) -> ProfileLookup {
        ProfileLookup::new(self.backend().clone(), self.config().request_timeout)
    }

    pub fn directory(&self) -> ConversationDirectory {
        ConversationDirectory::new(
            self.backend().clone(),
            self.profiles(),
            self.config().directory_page_size,
            self.config().request_timeout,
        )
    }

    pub fn pager(&self) -> MessagePager {
        MessagePager::new(
            self.backend().clone(),
            self.config().page_size,
            self.config().request_timeout,
        )
    }

    pub fn realtime(&self) -> RealtimeLayer {
        RealtimeLayer::new(self.backend().clone(), self.config().request_timeout)
    }

    pub fn receipts(&self, role: Role) -> ReadReceipts {
        ReadReceipts::new(
            self.backend().clone(),
            self.session().clone(),
            self.signals().clone(),
            role,
            self.config().request_timeout,
        )
    }

    pub fn outbox(&self) -> Outbox {
        Outbox::new(
            self.backend().clone(),
            self.session().clone(),
            self.config().request_timeout,
        )
    }

    pub fn unread_badge(&self, account_id: Uuid, role: Role) -> UnreadBadge {
        UnreadBadge::new(self.directory(), account_id, role)
    }
}
