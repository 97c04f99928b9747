//! JSON shapes exchanged with the chat backend, and their normalization into
//! the engine's model types.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::model::{
    ConversationSummary, HistoryPage, LastMessage, LiveEvent, Message, MessageBody, MessageStatus,
};
use super::reactions::Reactions;

pub const DEST_SEND: &str = "/app/chat.send";
pub const DEST_EDIT: &str = "/app/chat.edit";
pub const DEST_DELETE: &str = "/app/chat.delete";
pub const DEST_STATUS: &str = "/app/chat.status";
pub const DEST_REACT: &str = "/app/chat.react";
pub const DEST_UNREACT: &str = "/app/chat.unreact";

pub fn user_messages_topic(user_id: &str) -> String {
    format!("/user/{user_id}/queue/messages")
}

pub fn user_reactions_topic(user_id: &str) -> String {
    format!("/user/{user_id}/queue/reactions")
}

pub fn conversation_topic(conversation_id: &str) -> String {
    format!("/topic/chat/{conversation_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("unparseable timestamp `{0}`")]
    Timestamp(String),
}

/// Backends serialize ids as numbers or strings depending on the entity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Text(String),
    Number(i64),
}

impl IdValue {
    pub fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Millis(i64),
    Text(String),
}

impl TimestampValue {
    /// Unix milliseconds. Zone-less timestamps are taken as UTC.
    pub fn to_millis(&self) -> Result<i64, WireError> {
        match self {
            Self::Millis(ms) => Ok(*ms),
            Self::Text(s) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return Ok(dt.timestamp_millis());
                }
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|dt| dt.and_utc().timestamp_millis())
                    .map_err(|_| WireError::Timestamp(s.clone()))
            }
        }
    }
}

/// A message as the backend serializes it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: IdValue,
    #[serde(alias = "conversationId")]
    pub chat_id: IdValue,
    #[serde(default)]
    pub sender_id: Option<IdValue>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub is_file: bool,
    #[serde(default)]
    pub timestamp: Option<TimestampValue>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<IdValue>,
    #[serde(default)]
    pub reactions: HashMap<String, Vec<IdValue>>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl MessageRecord {
    fn body(&self) -> MessageBody {
        if self.is_file {
            let url = self
                .file_url
                .clone()
                .or_else(|| self.content.clone())
                .unwrap_or_default();
            MessageBody::File { url }
        } else {
            MessageBody::Text(self.content.clone().unwrap_or_default())
        }
    }

    fn parsed_status(&self) -> MessageStatus {
        self.status
            .as_deref()
            .and_then(MessageStatus::from_wire)
            .unwrap_or(MessageStatus::Sent)
    }

    pub fn into_message(self) -> Result<Message, WireError> {
        let body = self.body();
        let status = self.parsed_status();
        let created_at = self
            .timestamp
            .as_ref()
            .ok_or(WireError::Missing("timestamp"))?
            .to_millis()?;
        let sender_id = self
            .sender_id
            .ok_or(WireError::Missing("senderId"))?
            .into_string();
        let mut message = Message::confirmed(
            self.id.into_string(),
            self.chat_id.into_string(),
            sender_id,
            body,
            created_at,
        );
        message.edited = self.edited;
        message.status = status;
        message.reply_to = self.reply_to_id.map(IdValue::into_string);
        message.client_id = self.client_id.filter(|c| !c.is_empty());
        message.reactions = Reactions::from_map(
            self.reactions
                .into_iter()
                .map(|(kind, users)| (kind, users.into_iter().map(IdValue::into_string))),
        );
        Ok(message)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    #[serde(default)]
    pub content: Vec<MessageRecord>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub number: u32,
}

impl PageRecord {
    /// Records that fail to normalize are skipped, not fatal for the page.
    pub fn into_page(self) -> HistoryPage {
        let mut messages: Vec<Message> = Vec::with_capacity(self.content.len());
        for record in self.content {
            match record.into_message() {
                Ok(m) => messages.push(m),
                Err(err) => tracing::warn!(%err, "skipping malformed history record"),
            }
        }
        HistoryPage {
            messages,
            total_pages: self.total_pages,
            number: self.number,
        }
    }
}

/// One row of `GET /api/chats`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: IdValue,
    #[serde(default)]
    pub participants: Vec<IdValue>,
    #[serde(default)]
    pub user1_id: Option<IdValue>,
    #[serde(default)]
    pub user2_id: Option<IdValue>,
    #[serde(default)]
    pub peer_name: Option<String>,
    #[serde(default)]
    pub last_message: Option<MessageRecord>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub muted: bool,
}

impl ChatRecord {
    pub fn into_summary(self, local_user_id: &str) -> ConversationSummary {
        let mut ids: Vec<String> = self
            .participants
            .into_iter()
            .chain(self.user1_id)
            .chain(self.user2_id)
            .map(IdValue::into_string)
            .collect();
        ids.dedup();
        let a = ids
            .first()
            .cloned()
            .unwrap_or_else(|| local_user_id.to_string());
        let b = ids.get(1).cloned().unwrap_or_else(|| a.clone());

        let mut summary = ConversationSummary::new(self.id.into_string(), a, b);
        summary.peer_name = self.peer_name;
        summary.unread_count = self.unread_count;
        summary.pinned = self.pinned;
        summary.muted = self.muted;
        summary.last_message = self.last_message.and_then(|r| match r.into_message() {
            Ok(m) => Some(LastMessage::from(&m)),
            Err(err) => {
                tracing::warn!(%err, "dropping malformed last message");
                None
            }
        });
        summary
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WireFrame {
    Send {
        message: MessageRecord,
    },
    Edit {
        message: MessageRecord,
    },
    Delete {
        message: MessageRecord,
    },
    Status {
        message: MessageRecord,
    },
    #[serde(rename_all = "camelCase")]
    ReactionAdd {
        message_id: IdValue,
        chat_id: IdValue,
        user_id: IdValue,
        reaction: String,
    },
    #[serde(rename_all = "camelCase")]
    ReactionRemove {
        message_id: IdValue,
        chat_id: IdValue,
        user_id: IdValue,
    },
    #[serde(other)]
    Unknown,
}

/// Parse one inbound frame. `Ok(None)` for frame types this client does not
/// handle.
pub fn parse_live_event(body: &str) -> Result<Option<LiveEvent>, WireError> {
    let frame: WireFrame = serde_json::from_str(body)?;
    let event = match frame {
        WireFrame::Send { message } => LiveEvent::Send {
            message: message.into_message()?,
        },
        WireFrame::Edit { message } => {
            let body = message.body();
            LiveEvent::Edit {
                conversation_id: message.chat_id.into_string(),
                message_id: message.id.into_string(),
                body,
            }
        }
        WireFrame::Delete { message } => LiveEvent::Delete {
            conversation_id: message.chat_id.into_string(),
            message_id: message.id.into_string(),
        },
        WireFrame::Status { message } => {
            let status = message
                .status
                .as_deref()
                .and_then(MessageStatus::from_wire)
                .ok_or(WireError::Missing("status"))?;
            LiveEvent::StatusUpdate {
                conversation_id: message.chat_id.into_string(),
                message_id: message.id.into_string(),
                status,
            }
        }
        WireFrame::ReactionAdd {
            message_id,
            chat_id,
            user_id,
            reaction,
        } => LiveEvent::ReactionAdd {
            conversation_id: chat_id.into_string(),
            message_id: message_id.into_string(),
            user_id: user_id.into_string(),
            kind: reaction,
        },
        WireFrame::ReactionRemove {
            message_id,
            chat_id,
            user_id,
        } => LiveEvent::ReactionRemove {
            conversation_id: chat_id.into_string(),
            message_id: message_id.into_string(),
            user_id: user_id.into_string(),
        },
        WireFrame::Unknown => return Ok(None),
    };
    Ok(Some(event))
}

// ---- outbound payloads -----------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload<'a> {
    pub chat_id: &'a str,
    pub content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<&'a str>,
    pub is_file: bool,
    pub client_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload<'a> {
    pub message_id: &'a str,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactPayload<'a> {
    pub message_id: &'a str,
    pub reaction: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditPayload<'a> {
    pub message_id: &'a str,
    pub content: &'a str,
}

/// Body of `delete` and `unreact`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRefPayload<'a> {
    pub message_id: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettingsPayload {
    pub pinned: bool,
    pub muted: bool,
}

pub fn send_payload(
    conversation_id: &str,
    client_id: &str,
    body: &MessageBody,
    reply_to: Option<&str>,
) -> String {
    to_json(&SendPayload {
        chat_id: conversation_id,
        content: body.preview(),
        reply_to_id: reply_to,
        is_file: body.is_file(),
        client_id,
    })
}

pub fn status_payload(message_id: &str, status: MessageStatus) -> String {
    to_json(&StatusPayload {
        message_id,
        status: status.as_wire(),
    })
}

pub fn react_payload(message_id: &str, kind: &str) -> String {
    to_json(&ReactPayload {
        message_id,
        reaction: kind,
    })
}

pub fn edit_payload(message_id: &str, body: &MessageBody) -> String {
    to_json(&EditPayload {
        message_id,
        content: body.preview(),
    })
}

pub fn message_ref_payload(message_id: &str) -> String {
    to_json(&MessageRefPayload { message_id })
}

fn to_json<T: Serialize>(value: &T) -> String {
    // Plain structs of strings and bools always serialize.
    serde_json::to_string(value).unwrap_or_default()
}

/// Parse the server record a publish receipt may carry.
pub fn parse_receipt_message(body: &str) -> Option<Message> {
    let record: MessageRecord = serde_json::from_str(body).ok()?;
    record.into_message().ok()
}
