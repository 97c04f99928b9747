#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Auth
    Login {
        user_id: String,
        token: String,
    },
    Logout,

    // Conversation
    OpenChat {
        chat_id: String,
    },
    CloseChat,
    LoadOlderMessages {
        chat_id: String,
    },
    ReloadChat {
        chat_id: String,
    },

    // Messages
    SendMessage {
        chat_id: String,
        content: String,
        reply_to_message_id: Option<String>,
    },
    SendFile {
        chat_id: String,
        file_url: String,
        reply_to_message_id: Option<String>,
    },
    RetryMessage {
        chat_id: String,
        client_id: String,
    },
    DiscardMessage {
        chat_id: String,
        client_id: String,
    },
    EditMessage {
        chat_id: String,
        message_id: String,
        content: String,
    },
    DeleteMessage {
        chat_id: String,
        message_id: String,
    },
    React {
        chat_id: String,
        message_id: String,
        kind: String,
    },
    Unreact {
        chat_id: String,
        message_id: String,
    },

    // Chat list
    SetChatPinned {
        chat_id: String,
        pinned: bool,
    },
    SetChatMuted {
        chat_id: String,
        muted: bool,
    },
    RefreshChatList,

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes the token or message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            // Auth
            AppAction::Login { .. } => "Login",
            AppAction::Logout => "Logout",

            // Conversation
            AppAction::OpenChat { .. } => "OpenChat",
            AppAction::CloseChat => "CloseChat",
            AppAction::LoadOlderMessages { .. } => "LoadOlderMessages",
            AppAction::ReloadChat { .. } => "ReloadChat",

            // Messages
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::SendFile { .. } => "SendFile",
            AppAction::RetryMessage { .. } => "RetryMessage",
            AppAction::DiscardMessage { .. } => "DiscardMessage",
            AppAction::EditMessage { .. } => "EditMessage",
            AppAction::DeleteMessage { .. } => "DeleteMessage",
            AppAction::React { .. } => "React",
            AppAction::Unreact { .. } => "Unreact",

            // Chat list
            AppAction::SetChatPinned { .. } => "SetChatPinned",
            AppAction::SetChatMuted { .. } => "SetChatMuted",
            AppAction::RefreshChatList => "RefreshChatList",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
