use super::reactions::Reactions;

/// Server-side delivery status. Ordered: a message only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// The acknowledgement a recipient still owes for a message in this status.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Sent => Some(Self::Delivered),
            Self::Delivered => Some(Self::Read),
            Self::Read => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SENT" => Some(Self::Sent),
            "DELIVERED" => Some(Self::Delivered),
            "READ" | "SEEN" => Some(Self::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    /// Reference to a file that was already uploaded elsewhere.
    File { url: String },
}

impl MessageBody {
    pub fn preview(&self) -> &str {
        match self {
            Self::Text(t) => t,
            Self::File { url } => url,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }
}

/// Local reconciliation state, orthogonal to [`MessageStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// Known to the server.
    Confirmed,
    /// Optimistic send not yet correlated with a server record. `acked` is set
    /// once the publish itself succeeded.
    Pending { acked: bool },
    /// Optimistic send whose publish failed. Terminal until retry or discard.
    Failed { reason: String },
    /// Optimistic delete awaiting confirmation. Hidden from the view.
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned id. `None` until the optimistic record is promoted.
    pub id: Option<String>,
    /// Correlation id round-tripped through the send payload and its echo.
    pub client_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: MessageBody,
    /// Unix milliseconds.
    pub created_at: i64,
    pub edited: bool,
    pub status: MessageStatus,
    pub reply_to: Option<String>,
    pub reactions: Reactions,
    pub sync: SyncState,
    /// Insertion order, assigned by the store. Breaks `created_at` ties.
    pub(crate) seq: u64,
}

impl Message {
    /// A server-confirmed message, as it arrives from history or the live stream.
    pub fn confirmed(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        body: MessageBody,
        created_at: i64,
    ) -> Self {
        Self {
            id: Some(id.into()),
            client_id: None,
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            body,
            created_at,
            edited: false,
            status: MessageStatus::Sent,
            reply_to: None,
            reactions: Reactions::default(),
            sync: SyncState::Confirmed,
            seq: 0,
        }
    }

    /// Stable key for the presentation layer: server id once known, else the
    /// correlation id.
    pub fn key(&self) -> &str {
        self.id
            .as_deref()
            .or(self.client_id.as_deref())
            .unwrap_or_default()
    }

    pub fn is_local_only(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_visible(&self) -> bool {
        self.sync != SyncState::Deleting
    }

    fn sort_key(&self) -> (i64, u64) {
        (self.created_at, self.seq)
    }

    pub(crate) fn sorts_before(&self, other: &Message) -> bool {
        self.sort_key() < other.sort_key()
    }
}

/// One unit of the inbound live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    Send {
        message: Message,
    },
    Edit {
        conversation_id: String,
        message_id: String,
        body: MessageBody,
    },
    Delete {
        conversation_id: String,
        message_id: String,
    },
    StatusUpdate {
        conversation_id: String,
        message_id: String,
        status: MessageStatus,
    },
    ReactionAdd {
        conversation_id: String,
        message_id: String,
        user_id: String,
        kind: String,
    },
    ReactionRemove {
        conversation_id: String,
        message_id: String,
        user_id: String,
    },
}

impl LiveEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Send { message } => &message.conversation_id,
            Self::Edit {
                conversation_id, ..
            }
            | Self::Delete {
                conversation_id, ..
            }
            | Self::StatusUpdate {
                conversation_id, ..
            }
            | Self::ReactionAdd {
                conversation_id, ..
            }
            | Self::ReactionRemove {
                conversation_id, ..
            } => conversation_id,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Send { message } => message.id.as_deref(),
            Self::Edit { message_id, .. }
            | Self::Delete { message_id, .. }
            | Self::StatusUpdate { message_id, .. }
            | Self::ReactionAdd { message_id, .. }
            | Self::ReactionRemove { message_id, .. } => Some(message_id),
        }
    }

    /// Log-safe tag (never includes message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
            Self::StatusUpdate { .. } => "status",
            Self::ReactionAdd { .. } => "reaction_add",
            Self::ReactionRemove { .. } => "reaction_remove",
        }
    }
}

/// A page of persisted history. `messages` are oldest-first; page 0 is the newest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub total_pages: u32,
    pub number: u32,
}

impl HistoryPage {
    pub fn has_more(&self) -> bool {
        self.number.saturating_add(1) < self.total_pages
    }
}

/// Snapshot of the newest message of a conversation, for list previews.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessage {
    /// `None` while the snapshot is an unconfirmed local send.
    pub message_id: Option<String>,
    pub client_id: Option<String>,
    pub sender_id: String,
    pub body: MessageBody,
    pub created_at: i64,
    pub status: MessageStatus,
    pub edited: bool,
}

impl From<&Message> for LastMessage {
    fn from(m: &Message) -> Self {
        Self {
            message_id: m.id.clone(),
            client_id: m.client_id.clone(),
            sender_id: m.sender_id.clone(),
            body: m.body.clone(),
            created_at: m.created_at,
            status: m.status,
            edited: m.edited,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub participants: (String, String),
    pub peer_name: Option<String>,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
    pub pinned: bool,
    pub muted: bool,
}

impl ConversationSummary {
    pub fn new(conversation_id: impl Into<String>, a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            participants: (a.into(), b.into()),
            peer_name: None,
            last_message: None,
            unread_count: 0,
            pinned: false,
            muted: false,
        }
    }

    /// The participant that is not `me` (or `me` for a note-to-self chat).
    pub fn peer_id<'a>(&'a self, me: &str) -> &'a str {
        if self.participants.0 == me {
            &self.participants.1
        } else {
            &self.participants.0
        }
    }

    pub fn settings(&self) -> ChatSettings {
        ChatSettings {
            pinned: self.pinned,
            muted: self.muted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    pub pinned: bool,
    pub muted: bool,
}
