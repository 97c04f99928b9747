// Store -> AppState projection.

use super::*;

use crate::state::{ChatMessage, ChatSummary, ChatViewState, MessageDeliveryState, ReactionSummary};
use crate::sync::{ConversationSummary, Message, MessageBody, MessageStatus, Reactions, SyncState};

impl AppCore {
    pub(super) fn refresh_current_chat(&mut self) {
        self.state.current_chat = self.session.as_ref().and_then(project_chat_view);
    }

    pub(super) fn refresh_chat_list_state(&mut self) {
        self.state.chat_list = match self.session.as_ref() {
            Some(sess) => sess
                .chats
                .sorted()
                .into_iter()
                .map(|c| project_summary(c, &sess.user_id))
                .collect(),
            None => vec![],
        };
    }
}

fn project_summary(summary: &ConversationSummary, me: &str) -> ChatSummary {
    let last = summary.last_message.as_ref();
    ChatSummary {
        chat_id: summary.conversation_id.clone(),
        peer_id: summary.peer_id(me).to_string(),
        peer_name: summary.peer_name.clone(),
        last_message: last.map(|m| m.body.preview().to_string()),
        last_message_at: last.map(|m| m.created_at),
        last_message_is_mine: last.is_some_and(|m| m.sender_id == me),
        unread_count: summary.unread_count,
        pinned: summary.pinned,
        muted: summary.muted,
    }
}

fn project_chat_view(sess: &Session) -> Option<ChatViewState> {
    let chat_id = sess.messages.conversation_id()?;
    let summary = sess.chats.get(chat_id);
    Some(ChatViewState {
        chat_id: chat_id.to_string(),
        peer_id: summary.map(|s| s.peer_id(&sess.user_id).to_string()),
        peer_name: summary.and_then(|s| s.peer_name.clone()),
        messages: sess
            .messages
            .visible()
            .map(|m| project_message(m, &sess.user_id))
            .collect(),
        can_load_older: sess.messages.has_more(),
        is_loading: sess.messages.is_loading() && !sess.messages.is_loading_earlier(),
        is_loading_older: sess.messages.is_loading_earlier(),
        load_error: sess.messages.load_error().map(ToString::to_string),
    })
}

fn project_message(m: &Message, me: &str) -> ChatMessage {
    let (content, file_url) = match &m.body {
        MessageBody::Text(text) => (text.clone(), None),
        MessageBody::File { url } => (String::new(), Some(url.clone())),
    };
    ChatMessage {
        id: m.key().to_string(),
        server_id: m.id.clone(),
        client_id: m.client_id.clone(),
        sender_id: m.sender_id.clone(),
        content,
        file_url,
        reply_to_message_id: m.reply_to.clone(),
        timestamp: m.created_at,
        edited: m.edited,
        is_mine: m.sender_id == me,
        delivery: delivery_state(m),
        reactions: reaction_summaries(&m.reactions, me),
    }
}

fn delivery_state(m: &Message) -> MessageDeliveryState {
    match &m.sync {
        SyncState::Failed { reason } => MessageDeliveryState::Failed {
            reason: reason.clone(),
        },
        SyncState::Pending { .. } => MessageDeliveryState::Pending,
        SyncState::Confirmed | SyncState::Deleting => match m.status {
            MessageStatus::Sent => MessageDeliveryState::Sent,
            MessageStatus::Delivered => MessageDeliveryState::Delivered,
            MessageStatus::Read => MessageDeliveryState::Read,
        },
    }
}

fn reaction_summaries(reactions: &Reactions, me: &str) -> Vec<ReactionSummary> {
    reactions
        .iter()
        .map(|(kind, users)| ReactionSummary {
            kind: kind.to_string(),
            count: users.len() as u32,
            reacted_by_me: users.contains(me),
        })
        .collect()
}
