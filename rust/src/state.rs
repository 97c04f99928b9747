#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub connection: ConnectionState,
    pub busy: BusyState,
    pub chat_list: Vec<ChatSummary>,
    pub current_chat: Option<ChatViewState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::LoggedOut,
            connection: ConnectionState::Offline,
            busy: BusyState::idle(),
            chat_list: vec![],
            current_chat: None,
            toast: None,
        }
    }
}

/// "In flight" flags for long operations, so the UI can show spinners
/// without guessing.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub logging_in: bool,
    pub loading_chat_list: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            logging_in: false,
            loading_chat_list: false,
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    LoggedIn { user_id: String },
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Offline,
    Connecting,
    Connected,
    /// Reconnect attempts were exhausted or the credential was rejected.
    Failed { reason: String },
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatSummary {
    pub chat_id: String,
    pub peer_id: String,
    pub peer_name: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<i64>,
    pub last_message_is_mine: bool,
    pub unread_count: u32,
    pub pinned: bool,
    pub muted: bool,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatViewState {
    pub chat_id: String,
    pub peer_id: Option<String>,
    pub peer_name: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub can_load_older: bool,
    pub is_loading: bool,
    pub is_loading_older: bool,
    /// Last history fetch failure; cleared by the next successful or retried fetch.
    pub load_error: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    /// Server id once confirmed, else the client correlation id. Stable across
    /// promotion only through `client_id`.
    pub id: String,
    pub server_id: Option<String>,
    pub client_id: Option<String>,
    pub sender_id: String,
    pub content: String,
    pub file_url: Option<String>,
    pub reply_to_message_id: Option<String>,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub edited: bool,
    pub is_mine: bool,
    pub delivery: MessageDeliveryState,
    pub reactions: Vec<ReactionSummary>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ReactionSummary {
    pub kind: String,
    pub count: u32,
    pub reacted_by_me: bool,
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed { reason: String },
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
