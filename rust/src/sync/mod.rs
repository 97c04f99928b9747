//! Chat synchronization engine.
//!
//! Everything in here is synchronous and single-owner: the app actor holds the
//! stores and feeds them history pages, live events and local actions one at a
//! time. Network I/O lives in [`crate::transport`] and [`crate::api`].

pub mod chat_list;
pub mod message_store;
pub mod model;
pub mod reactions;
pub mod status_tracker;
pub mod wire;

pub use chat_list::ChatListStore;
pub use message_store::{MergeOutcome, MessageStore, OutgoingSend, PageKind, PageRequest};
pub use model::{
    ChatSettings, ConversationSummary, HistoryPage, LastMessage, LiveEvent, Message, MessageBody,
    MessageStatus, SyncState,
};
pub use reactions::{PendingReactions, Reactions};
pub use status_tracker::{AckRequest, StatusTracker};

/// Who we are and which conversation is on screen. Passed explicitly to the
/// handlers that care instead of living in a global.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatContext {
    pub local_user_id: String,
    pub open_conversation: Option<String>,
}

impl ChatContext {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            open_conversation: None,
        }
    }

    pub fn is_open(&self, conversation_id: &str) -> bool {
        self.open_conversation.as_deref() == Some(conversation_id)
    }
}
