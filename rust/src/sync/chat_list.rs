//! Conversation summaries kept current from the live stream, whether or not
//! the conversation is open.

use std::collections::{HashMap, HashSet, VecDeque};

use super::model::{ChatSettings, ConversationSummary, LastMessage, LiveEvent, Message};
use super::ChatContext;

// The same `send` can arrive on the user channel and a conversation channel.
const SEEN_CAP: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingSettings {
    previous: ChatSettings,
    desired: ChatSettings,
}

#[derive(Debug)]
pub struct ChatListStore {
    local_user_id: String,
    summaries: HashMap<String, ConversationSummary>,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    pending_settings: HashMap<String, PendingSettings>,
}

impl ChatListStore {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            summaries: HashMap::new(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            pending_settings: HashMap::new(),
        }
    }

    pub fn get(&self, conversation_id: &str) -> Option<&ConversationSummary> {
        self.summaries.get(conversation_id)
    }

    /// Pinned first, then newest activity first.
    pub fn sorted(&self) -> Vec<&ConversationSummary> {
        let mut list: Vec<&ConversationSummary> = self.summaries.values().collect();
        list.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| last_at(b).cmp(&last_at(a)))
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        list
    }

    /// Replace everything with a fresh server listing.
    pub fn replace_all(&mut self, summaries: Vec<ConversationSummary>, ctx: &ChatContext) {
        self.summaries.clear();
        for mut s in summaries {
            if ctx.is_open(&s.conversation_id) {
                s.unread_count = 0;
            }
            if let Some(p) = self.pending_settings.get(&s.conversation_id) {
                s.pinned = p.desired.pinned;
                s.muted = p.desired.muted;
            }
            if let Some(id) = s.last_message.as_ref().and_then(|m| m.message_id.clone()) {
                self.mark_seen(&id);
            }
            self.summaries.insert(s.conversation_id.clone(), s);
        }
    }

    /// Returns whether any summary changed.
    pub fn apply_live_event(&mut self, event: &LiveEvent, ctx: &ChatContext) -> bool {
        match event {
            LiveEvent::Send { message } => self.apply_send(message, ctx),
            LiveEvent::Edit {
                conversation_id,
                message_id,
                body,
            } => self.patch_last(conversation_id, message_id, |last| {
                if last.body == *body && last.edited {
                    return false;
                }
                last.body = body.clone();
                last.edited = true;
                true
            }),
            LiveEvent::StatusUpdate {
                conversation_id,
                message_id,
                status,
            } => self.patch_last(conversation_id, message_id, |last| {
                if *status <= last.status {
                    return false;
                }
                last.status = *status;
                true
            }),
            LiveEvent::Delete {
                conversation_id,
                message_id,
            } => {
                // The real new last message is unknown until the next full refresh.
                let Some(s) = self.summaries.get_mut(conversation_id) else {
                    return false;
                };
                if s.last_message.as_ref().and_then(|m| m.message_id.as_deref())
                    != Some(message_id.as_str())
                {
                    return false;
                }
                s.last_message = None;
                true
            }
            LiveEvent::ReactionAdd { .. } | LiveEvent::ReactionRemove { .. } => false,
        }
    }

    fn apply_send(&mut self, message: &Message, ctx: &ChatContext) -> bool {
        let Some(id) = message.id.clone() else {
            return false;
        };
        if !self.mark_seen(&id) {
            return false;
        }
        let me = self.local_user_id.clone();
        let summary = self
            .summaries
            .entry(message.conversation_id.clone())
            .or_insert_with(|| {
                tracing::debug!(conversation_id = %message.conversation_id, "new conversation from live send");
                ConversationSummary::new(&message.conversation_id, &message.sender_id, &me)
            });

        let replaces = match &summary.last_message {
            None => true,
            // Our own unconfirmed send is replaced by its confirmation.
            Some(last) if last.message_id.is_none() => {
                (message.client_id.is_some() && message.client_id == last.client_id)
                    || message.created_at >= last.created_at
            }
            Some(last) => message.created_at >= last.created_at,
        };
        if replaces {
            summary.last_message = Some(LastMessage::from(message));
        }
        if message.sender_id != me && !ctx.is_open(&message.conversation_id) {
            summary.unread_count = summary.unread_count.saturating_add(1);
        }
        true
    }

    /// Show a local optimistic send in the preview right away.
    pub fn record_local_send(&mut self, message: &Message) -> bool {
        let Some(s) = self.summaries.get_mut(&message.conversation_id) else {
            return false;
        };
        s.last_message = Some(LastMessage::from(message));
        true
    }

    /// A failed local send was discarded. If it is still the preview, fall
    /// back to `newest`, the latest message left in the open conversation.
    pub fn discard_local_send(
        &mut self,
        conversation_id: &str,
        client_id: &str,
        newest: Option<&Message>,
    ) -> bool {
        let Some(s) = self.summaries.get_mut(conversation_id) else {
            return false;
        };
        match &s.last_message {
            Some(last)
                if last.message_id.is_none() && last.client_id.as_deref() == Some(client_id) =>
            {
                s.last_message = newest.map(LastMessage::from);
                true
            }
            _ => false,
        }
    }

    /// The conversation was opened: everything in it counts as seen.
    pub fn mark_opened(&mut self, conversation_id: &str) -> bool {
        match self.summaries.get_mut(conversation_id) {
            Some(s) if s.unread_count != 0 => {
                s.unread_count = 0;
                true
            }
            _ => false,
        }
    }

    /// Optimistically change pin/mute. Returns the settings to send to the
    /// server, or `None` if nothing changed.
    pub fn update_settings(
        &mut self,
        conversation_id: &str,
        f: impl FnOnce(&mut ChatSettings),
    ) -> Option<ChatSettings> {
        let s = self.summaries.get_mut(conversation_id)?;
        let previous = s.settings();
        let mut desired = previous;
        f(&mut desired);
        if desired == previous {
            return None;
        }
        s.pinned = desired.pinned;
        s.muted = desired.muted;
        self.pending_settings
            .entry(conversation_id.to_string())
            .and_modify(|p| p.desired = desired)
            .or_insert(PendingSettings { previous, desired });
        Some(desired)
    }

    pub fn confirm_settings(&mut self, conversation_id: &str) {
        self.pending_settings.remove(conversation_id);
    }

    pub fn rollback_settings(&mut self, conversation_id: &str) -> bool {
        let Some(p) = self.pending_settings.remove(conversation_id) else {
            return false;
        };
        let Some(s) = self.summaries.get_mut(conversation_id) else {
            return false;
        };
        s.pinned = p.previous.pinned;
        s.muted = p.previous.muted;
        true
    }

    fn patch_last(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        f: impl FnOnce(&mut LastMessage) -> bool,
    ) -> bool {
        let Some(last) = self
            .summaries
            .get_mut(conversation_id)
            .and_then(|s| s.last_message.as_mut())
        else {
            return false;
        };
        if last.message_id.as_deref() != Some(message_id) {
            return false;
        }
        f(last)
    }

    /// Returns `false` if `message_id` was already seen.
    fn mark_seen(&mut self, message_id: &str) -> bool {
        if !self.seen.insert(message_id.to_string()) {
            return false;
        }
        self.seen_order.push_back(message_id.to_string());
        if self.seen_order.len() > SEEN_CAP {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

fn last_at(s: &ConversationSummary) -> i64 {
    s.last_message.as_ref().map(|m| m.created_at).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::model::{MessageBody, MessageStatus};

    const ME: &str = "me";

    fn ctx(open: Option<&str>) -> ChatContext {
        ChatContext {
            local_user_id: ME.into(),
            open_conversation: open.map(ToString::to_string),
        }
    }

    fn msg(id: &str, chat: &str, sender: &str, ts: i64) -> Message {
        Message::confirmed(id, chat, sender, MessageBody::Text(format!("body {id}")), ts)
    }

    fn store_with(chats: &[&str]) -> ChatListStore {
        let mut s = ChatListStore::new(ME);
        s.replace_all(
            chats
                .iter()
                .map(|c| ConversationSummary::new(*c, ME, format!("peer-{c}")))
                .collect(),
            &ctx(None),
        );
        s
    }

    fn unread(s: &ChatListStore, chat: &str) -> u32 {
        s.get(chat).unwrap().unread_count
    }

    #[test]
    fn inbound_send_to_closed_chat_increments_only_that_chat() {
        let mut s = store_with(&["a", "b"]);
        let ev = LiveEvent::Send {
            message: msg("m1", "a", "peer-a", 10),
        };
        assert!(s.apply_live_event(&ev, &ctx(Some("b"))));
        assert_eq!(unread(&s, "a"), 1);
        assert_eq!(unread(&s, "b"), 0);
        assert_eq!(
            s.get("a").unwrap().last_message.as_ref().unwrap().message_id.as_deref(),
            Some("m1")
        );

        // Redelivery on a second channel does not double count.
        assert!(!s.apply_live_event(&ev, &ctx(Some("b"))));
        assert_eq!(unread(&s, "a"), 1);
    }

    fn local(client_id: &str, chat: &str, ts: i64) -> Message {
        let mut m = msg("unused", chat, ME, ts);
        m.id = None;
        m.client_id = Some(client_id.into());
        m
    }

    #[test]
    fn discarded_local_send_leaves_preview() {
        let mut s = store_with(&["a"]);
        let earlier = msg("m1", "a", "peer-a", 10);
        s.apply_live_event(&LiveEvent::Send { message: earlier.clone() }, &ctx(Some("a")));
        assert!(s.record_local_send(&local("c-1", "a", 20)));

        // Another client id leaves the preview alone.
        assert!(!s.discard_local_send("a", "c-2", Some(&earlier)));
        assert!(s.discard_local_send("a", "c-1", Some(&earlier)));
        let last = s.get("a").unwrap().last_message.as_ref().unwrap();
        assert_eq!(last.message_id.as_deref(), Some("m1"));

        assert!(s.record_local_send(&local("c-3", "a", 30)));
        assert!(s.discard_local_send("a", "c-3", None));
        assert!(s.get("a").unwrap().last_message.is_none());
    }

    #[test]
    fn discard_after_confirmation_keeps_preview() {
        let mut s = store_with(&["a"]);
        let mut confirmed = msg("m5", "a", ME, 50);
        confirmed.client_id = Some("c-1".into());
        s.apply_live_event(&LiveEvent::Send { message: confirmed }, &ctx(Some("a")));
        assert!(!s.discard_local_send("a", "c-1", None));
        assert!(s.get("a").unwrap().last_message.is_some());
    }

    #[test]
    fn open_chat_and_own_messages_do_not_count() {
        let mut s = store_with(&["a"]);
        s.apply_live_event(
            &LiveEvent::Send {
                message: msg("m1", "a", "peer-a", 10),
            },
            &ctx(Some("a")),
        );
        s.apply_live_event(
            &LiveEvent::Send {
                message: msg("m2", "a", ME, 11),
            },
            &ctx(None),
        );
        assert_eq!(unread(&s, "a"), 0);
    }

    #[test]
    fn opening_resets_unread() {
        let mut s = store_with(&["a"]);
        for i in 0..3 {
            s.apply_live_event(
                &LiveEvent::Send {
                    message: msg(&format!("m{i}"), "a", "peer-a", i),
                },
                &ctx(None),
            );
        }
        assert_eq!(unread(&s, "a"), 3);
        assert!(s.mark_opened("a"));
        assert_eq!(unread(&s, "a"), 0);
    }

    #[test]
    fn deleting_cached_last_message_clears_it() {
        let mut s = store_with(&["a"]);
        s.apply_live_event(
            &LiveEvent::Send {
                message: msg("m1", "a", "peer-a", 10),
            },
            &ctx(None),
        );
        let del = LiveEvent::Delete {
            conversation_id: "a".into(),
            message_id: "m1".into(),
        };
        assert!(s.apply_live_event(&del, &ctx(None)));
        assert!(s.get("a").unwrap().last_message.is_none());
    }

    #[test]
    fn edit_and_status_only_patch_matching_snapshot() {
        let mut s = store_with(&["a"]);
        s.apply_live_event(
            &LiveEvent::Send {
                message: msg("m2", "a", ME, 10),
            },
            &ctx(None),
        );
        let edit_other = LiveEvent::Edit {
            conversation_id: "a".into(),
            message_id: "m1".into(),
            body: MessageBody::Text("x".into()),
        };
        assert!(!s.apply_live_event(&edit_other, &ctx(None)));

        let read = LiveEvent::StatusUpdate {
            conversation_id: "a".into(),
            message_id: "m2".into(),
            status: MessageStatus::Read,
        };
        assert!(s.apply_live_event(&read, &ctx(None)));
        let stale = LiveEvent::StatusUpdate {
            conversation_id: "a".into(),
            message_id: "m2".into(),
            status: MessageStatus::Delivered,
        };
        assert!(!s.apply_live_event(&stale, &ctx(None)));
        assert_eq!(
            s.get("a").unwrap().last_message.as_ref().unwrap().status,
            MessageStatus::Read
        );
    }

    #[test]
    fn older_send_does_not_replace_newer_preview() {
        let mut s = store_with(&["a"]);
        s.apply_live_event(
            &LiveEvent::Send {
                message: msg("m2", "a", "peer-a", 20),
            },
            &ctx(None),
        );
        s.apply_live_event(
            &LiveEvent::Send {
                message: msg("m1", "a", "peer-a", 10),
            },
            &ctx(None),
        );
        let s_a = s.get("a").unwrap();
        assert_eq!(s_a.last_message.as_ref().unwrap().message_id.as_deref(), Some("m2"));
        assert_eq!(s_a.unread_count, 2);
    }

    #[test]
    fn first_message_creates_summary() {
        let mut s = store_with(&[]);
        s.apply_live_event(
            &LiveEvent::Send {
                message: msg("m1", "new", "stranger", 5),
            },
            &ctx(None),
        );
        let new = s.get("new").unwrap();
        assert_eq!(new.peer_id(ME), "stranger");
        assert_eq!(new.unread_count, 1);
    }

    #[test]
    fn pinned_sort_first_and_rollback() {
        let mut s = store_with(&["a", "b"]);
        s.apply_live_event(
            &LiveEvent::Send {
                message: msg("m1", "b", "peer-b", 50),
            },
            &ctx(None),
        );
        assert_eq!(s.sorted()[0].conversation_id, "b");

        let sent = s.update_settings("a", |st| st.pinned = true).unwrap();
        assert!(sent.pinned);
        assert_eq!(s.sorted()[0].conversation_id, "a");
        assert!(s.update_settings("a", |st| st.pinned = true).is_none());

        assert!(s.rollback_settings("a"));
        assert!(!s.get("a").unwrap().pinned);
        assert_eq!(s.sorted()[0].conversation_id, "b");
    }

    #[test]
    fn refresh_keeps_pending_settings_and_open_chat_read() {
        let mut s = store_with(&["a", "b"]);
        s.update_settings("a", |st| st.muted = true);
        let mut fresh_a = ConversationSummary::new("a", ME, "peer-a");
        fresh_a.unread_count = 4;
        let mut fresh_b = ConversationSummary::new("b", ME, "peer-b");
        fresh_b.unread_count = 2;
        s.replace_all(vec![fresh_a, fresh_b], &ctx(Some("a")));
        assert!(s.get("a").unwrap().muted);
        assert_eq!(unread(&s, "a"), 0);
        assert_eq!(unread(&s, "b"), 2);
    }
}
