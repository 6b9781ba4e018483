//! Buyer/seller messaging core: inbox listing, paginated threads with live
//! updates, read receipts and unread counters, all written against the
//! [`Backend`](backend::Backend) capability.

pub mod backend;
pub mod badge;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod outbox;
pub mod pagination;
pub mod profiles;
pub mod realtime;
pub mod receipts;
pub mod session;
pub mod signals;
pub mod timeline;
pub mod view;

pub use backend::{Backend, BackendError, LocalBackend};
pub use config::MessagingConfig;
pub use context::MessagingContext;
pub use error::{MessagingError, Outcome};
pub use session::{Session, SessionStore};
pub use view::{ConversationView, ThreadSnapshot, ThreadStatus};
