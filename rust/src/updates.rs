use crate::error::{ConnectError, LoadError, PublishError};
use crate::state::AppState;
use crate::sync::{AckRequest, ConversationSummary, HistoryPage, PageRequest};
use crate::transport::{Inbound, PublishAck, SubscriptionHandle};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Results of async work, reported back to the actor. Every variant carries
/// the session epoch it was started under so results that outlive a
/// logout/login are dropped.
#[derive(Debug)]
pub enum InternalEvent {
    // Connection lifecycle
    Connected {
        epoch: u64,
        result: Result<(), ConnectError>,
    },
    Subscribed {
        epoch: u64,
        topic: String,
        result: Result<SubscriptionHandle, PublishError>,
    },
    Inbound {
        epoch: u64,
        inbound: Inbound,
    },
    ReconnectDue {
        epoch: u64,
    },

    // REST results
    HistoryLoaded {
        epoch: u64,
        request: PageRequest,
        result: Result<HistoryPage, LoadError>,
    },
    ChatListLoaded {
        epoch: u64,
        result: Result<Vec<ConversationSummary>, LoadError>,
    },
    SettingsUpdated {
        epoch: u64,
        chat_id: String,
        result: Result<(), LoadError>,
    },

    // Publish results
    SendPublished {
        epoch: u64,
        chat_id: String,
        client_id: String,
        result: Result<PublishAck, PublishError>,
    },
    EditPublished {
        epoch: u64,
        chat_id: String,
        message_id: String,
        result: Result<(), PublishError>,
    },
    DeletePublished {
        epoch: u64,
        chat_id: String,
        message_id: String,
        result: Result<(), PublishError>,
    },
    ReactionPublished {
        epoch: u64,
        chat_id: String,
        message_id: String,
        result: Result<(), PublishError>,
    },

    // Acknowledgements
    AckDue {
        epoch: u64,
        request: AckRequest,
    },
    AckPublished {
        epoch: u64,
        request: AckRequest,
        result: Result<(), PublishError>,
    },
}

impl InternalEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            InternalEvent::Connected { epoch, .. }
            | InternalEvent::Subscribed { epoch, .. }
            | InternalEvent::Inbound { epoch, .. }
            | InternalEvent::ReconnectDue { epoch }
            | InternalEvent::HistoryLoaded { epoch, .. }
            | InternalEvent::ChatListLoaded { epoch, .. }
            | InternalEvent::SettingsUpdated { epoch, .. }
            | InternalEvent::SendPublished { epoch, .. }
            | InternalEvent::EditPublished { epoch, .. }
            | InternalEvent::DeletePublished { epoch, .. }
            | InternalEvent::ReactionPublished { epoch, .. }
            | InternalEvent::AckDue { epoch, .. }
            | InternalEvent::AckPublished { epoch, .. } => *epoch,
        }
    }
}
