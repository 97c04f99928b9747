//! Canonical message list for the open conversation.
//!
//! Every mutation (history page, live event, optimistic local action) goes
//! through the same reconciliation rules:
//!
//! - upsert by server id is idempotent: applying a unit twice equals once;
//! - a server record authored by the local user is first correlated with a
//!   pending optimistic record (by round-tripped `client_id`, or by body within
//!   a short window when the server did not echo one) and promotes it in place;
//! - references to ids that are not loaded are [`MergeOutcome::Missing`], not
//!   errors;
//! - status only moves forward.
//!
//! Merges are total: nothing here returns `Result`. Failures are recorded on
//! the affected message ([`SyncState::Failed`]) or as the store's `load_error`.

use std::collections::{HashMap, HashSet};

use crate::error::LoadError;

use super::model::{HistoryPage, LiveEvent, Message, MessageBody, MessageStatus, SyncState};
use super::reactions::{PendingReactions, Reactions};

pub const DEFAULT_ECHO_WINDOW_MS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Initial,
    Earlier,
}

/// A history fetch the store asked for. Results are only accepted for the
/// request that is currently in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub conversation_id: String,
    pub page: u32,
    pub size: u32,
    pub kind: PageKind,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// An optimistic record was matched to its server record.
    Promoted,
    Updated,
    Unchanged,
    /// The unit referenced a message that is not in the loaded window.
    Missing,
    /// The unit does not belong to the open conversation (or nothing is open).
    Ignored,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Inserted | Self::Promoted | Self::Updated)
    }
}

/// What the caller has to publish for an optimistic send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingSend {
    pub client_id: String,
    pub conversation_id: String,
    pub body: MessageBody,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEdit {
    previous: MessageBody,
    previous_edited: bool,
    desired: MessageBody,
}

#[derive(Debug)]
pub struct MessageStore {
    local_user_id: String,
    conversation_id: Option<String>,
    generation: u64,
    messages: Vec<Message>,
    next_seq: u64,
    page_size: u32,
    echo_window_ms: i64,

    oldest_page: Option<u32>,
    has_more: bool,
    in_flight: Option<PageRequest>,
    load_error: Option<LoadError>,

    // Server ids deleted while this conversation was open. A late `send` for
    // one of these must not resurrect it.
    tombstones: HashSet<String>,
    pending_edits: HashMap<String, PendingEdit>,
    pending_deletes: HashMap<String, SyncState>,
    pending_reactions: PendingReactions,
    // Live events applied while a page was in flight, re-applied on top of it.
    replay: Vec<LiveEvent>,
}

impl MessageStore {
    pub fn new(local_user_id: impl Into<String>, page_size: u32) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            conversation_id: None,
            generation: 0,
            messages: Vec::new(),
            next_seq: 0,
            page_size: page_size.max(1),
            echo_window_ms: DEFAULT_ECHO_WINDOW_MS,
            oldest_page: None,
            has_more: false,
            in_flight: None,
            load_error: None,
            tombstones: HashSet::new(),
            pending_edits: HashMap::new(),
            pending_deletes: HashMap::new(),
            pending_reactions: PendingReactions::default(),
            replay: Vec::new(),
        }
    }

    pub fn with_echo_window_ms(mut self, window: i64) -> Self {
        self.echo_window_ms = window.max(0);
        self
    }

    // ---- read model -------------------------------------------------------

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn is_open(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
    }

    /// All records in display order, including ones hidden by a pending delete.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn visible(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_visible())
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_loading_earlier(&self) -> bool {
        matches!(&self.in_flight, Some(r) if r.kind == PageKind::Earlier)
    }

    pub fn has_loaded_initial(&self) -> bool {
        self.oldest_page.is_some()
    }

    pub fn load_error(&self) -> Option<&LoadError> {
        self.load_error.as_ref()
    }

    pub fn find(&self, message_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.id.as_deref() == Some(message_id))
    }

    pub fn find_by_client_id(&self, client_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.client_id.as_deref() == Some(client_id))
    }

    // ---- lifecycle --------------------------------------------------------

    /// Start tracking `conversation_id`. Drops whatever was open before.
    pub fn open(&mut self, conversation_id: impl Into<String>) {
        self.reset();
        self.conversation_id = Some(conversation_id.into());
    }

    pub fn close(&mut self) {
        self.reset();
        self.conversation_id = None;
    }

    fn reset(&mut self) {
        // Bump the generation so results of in-flight fetches are discarded.
        self.generation = self.generation.wrapping_add(1);
        self.messages.clear();
        self.oldest_page = None;
        self.has_more = false;
        self.in_flight = None;
        self.load_error = None;
        self.tombstones.clear();
        self.pending_edits.clear();
        self.pending_deletes.clear();
        self.pending_reactions.clear();
        self.replay.clear();
    }

    // ---- history ----------------------------------------------------------

    /// Ask for the newest page. Supersedes any load already in flight, which
    /// is what a reconnect re-sync needs.
    pub fn begin_initial_load(&mut self) -> Option<PageRequest> {
        let conversation_id = self.conversation_id.clone()?;
        let req = PageRequest {
            conversation_id,
            page: 0,
            size: self.page_size,
            kind: PageKind::Initial,
            generation: self.generation,
        };
        self.in_flight = Some(req.clone());
        self.load_error = None;
        Some(req)
    }

    /// Ask for the next older page. `None` while a load is in flight, before
    /// the first page arrived, or when there is nothing older.
    pub fn begin_load_earlier(&mut self) -> Option<PageRequest> {
        if self.in_flight.is_some() || !self.has_more {
            return None;
        }
        let conversation_id = self.conversation_id.clone()?;
        let oldest = self.oldest_page?;
        let req = PageRequest {
            conversation_id,
            page: oldest.saturating_add(1),
            size: self.page_size,
            kind: PageKind::Earlier,
            generation: self.generation,
        };
        self.in_flight = Some(req.clone());
        self.load_error = None;
        Some(req)
    }

    fn take_in_flight(&mut self, req: &PageRequest) -> bool {
        if self.in_flight.as_ref() != Some(req) {
            tracing::debug!(
                conversation_id = %req.conversation_id,
                page = req.page,
                "discarding stale history page"
            );
            return false;
        }
        self.in_flight = None;
        true
    }

    /// Merge a fetched page. Returns `false` when the result was stale and dropped.
    pub fn apply_page(&mut self, req: &PageRequest, page: HistoryPage) -> bool {
        if !self.take_in_flight(req) {
            return false;
        }
        self.load_error = None;

        // Statuses already observed must survive a replace: they only move forward.
        let mut status_floor: HashMap<String, MessageStatus> = HashMap::new();
        if req.kind == PageKind::Initial {
            // Replace persisted records; unsent local work survives a re-sync.
            let (local, persisted): (Vec<Message>, Vec<Message>) = std::mem::take(&mut self.messages)
                .into_iter()
                .partition(Message::is_local_only);
            self.messages = local;
            status_floor.extend(
                persisted
                    .into_iter()
                    .filter_map(|m| m.id.map(|id| (id, m.status))),
            );
            self.oldest_page = Some(page.number);
        } else {
            self.oldest_page = Some(self.oldest_page.unwrap_or(0).max(page.number));
        }
        self.has_more = page.has_more();

        let conversation_id = req.conversation_id.clone();
        for mut message in page.messages {
            if message.conversation_id != conversation_id {
                continue;
            }
            if let Some(floor) = message.id.as_ref().and_then(|id| status_floor.get(id)) {
                message.status = message.status.max(*floor);
            }
            self.upsert(message);
        }
        // The page is a snapshot from before these arrived.
        for event in std::mem::take(&mut self.replay) {
            self.replay_live_event(&event);
        }
        true
    }

    /// Re-apply an event that was already merged once. Local changes made
    /// since it arrived stay pending on top.
    fn replay_live_event(&mut self, event: &LiveEvent) {
        match event {
            LiveEvent::Send { message } => {
                self.upsert_new(message.clone());
                return;
            }
            LiveEvent::Delete { message_id, .. } => {
                self.remove_confirmed(message_id);
                return;
            }
            LiveEvent::StatusUpdate {
                message_id, status, ..
            } => {
                self.advance_status(message_id, *status);
                return;
            }
            LiveEvent::Edit {
                message_id, body, ..
            } => {
                if let Some(m) = self.find_mut(message_id) {
                    m.body = body.clone();
                    m.edited = true;
                }
            }
            LiveEvent::ReactionAdd {
                message_id,
                user_id,
                kind,
                ..
            } => {
                if let Some(m) = self.find_mut(message_id) {
                    m.reactions.add(user_id, kind);
                }
            }
            LiveEvent::ReactionRemove {
                message_id,
                user_id,
                ..
            } => {
                if let Some(m) = self.find_mut(message_id) {
                    m.reactions.remove(user_id);
                }
            }
        }
        let Some(id) = event.message_id() else {
            return;
        };
        if let Some(idx) = self.messages.iter().position(|m| m.id.as_deref() == Some(id)) {
            let mut m = self.messages[idx].clone();
            self.overlay_pending(id, &mut m);
            self.messages[idx] = m;
        }
    }

    /// Record a failed fetch. The list itself is left untouched.
    pub fn fail_page(&mut self, req: &PageRequest, error: LoadError) -> bool {
        if !self.take_in_flight(req) {
            return false;
        }
        self.load_error = Some(error);
        self.replay.clear();
        true
    }

    // ---- live events ------------------------------------------------------

    /// The single entry point for inbound events.
    pub fn apply_live_event(&mut self, event: &LiveEvent) -> MergeOutcome {
        if !self.is_open(event.conversation_id()) {
            return MergeOutcome::Ignored;
        }
        if self.in_flight.is_some() {
            self.replay.push(event.clone());
        }
        self.merge_live_event(event)
    }

    fn merge_live_event(&mut self, event: &LiveEvent) -> MergeOutcome {
        match event {
            LiveEvent::Send { message } => self.upsert_new(message.clone()),
            LiveEvent::Edit {
                message_id, body, ..
            } => {
                self.pending_edits.remove(message_id);
                let Some(m) = self.find_mut(message_id) else {
                    return MergeOutcome::Missing;
                };
                if m.body == *body && m.edited {
                    return MergeOutcome::Unchanged;
                }
                m.body = body.clone();
                m.edited = true;
                MergeOutcome::Updated
            }
            LiveEvent::Delete { message_id, .. } => self.remove_confirmed(message_id),
            LiveEvent::StatusUpdate {
                message_id, status, ..
            } => self.advance_status(message_id, *status),
            LiveEvent::ReactionAdd {
                message_id,
                user_id,
                kind,
                ..
            } => {
                self.pending_reactions.confirm(message_id, user_id);
                let Some(m) = self.find_mut(message_id) else {
                    return MergeOutcome::Missing;
                };
                if m.reactions.add(user_id, kind) {
                    MergeOutcome::Updated
                } else {
                    MergeOutcome::Unchanged
                }
            }
            LiveEvent::ReactionRemove {
                message_id,
                user_id,
                ..
            } => {
                self.pending_reactions.confirm(message_id, user_id);
                let Some(m) = self.find_mut(message_id) else {
                    return MergeOutcome::Missing;
                };
                if m.reactions.remove(user_id).is_some() {
                    MergeOutcome::Updated
                } else {
                    MergeOutcome::Unchanged
                }
            }
        }
    }

    /// Advance a message's status; backward moves are ignored.
    pub fn advance_status(&mut self, message_id: &str, status: MessageStatus) -> MergeOutcome {
        let Some(m) = self.find_mut(message_id) else {
            return MergeOutcome::Missing;
        };
        if status <= m.status {
            return MergeOutcome::Unchanged;
        }
        m.status = status;
        MergeOutcome::Updated
    }

    // ---- optimistic sends -------------------------------------------------

    /// Append an optimistic record and return what has to be published.
    pub fn send_optimistic(
        &mut self,
        body: MessageBody,
        reply_to: Option<String>,
        now_ms: i64,
    ) -> Option<OutgoingSend> {
        let conversation_id = self.conversation_id.clone()?;
        let client_id = uuid::Uuid::new_v4().to_string();
        // Keep local sends at the tail even if our clock lags the server's.
        let created_at = self
            .messages
            .last()
            .map(|m| m.created_at.max(now_ms))
            .unwrap_or(now_ms);

        let message = Message {
            id: None,
            client_id: Some(client_id.clone()),
            conversation_id: conversation_id.clone(),
            sender_id: self.local_user_id.clone(),
            body: body.clone(),
            created_at,
            edited: false,
            status: MessageStatus::Sent,
            reply_to: reply_to.clone(),
            reactions: Reactions::default(),
            sync: SyncState::Pending { acked: false },
            seq: 0,
        };
        self.insert(message);

        Some(OutgoingSend {
            client_id,
            conversation_id,
            body,
            reply_to,
        })
    }

    /// The publish for `client_id` succeeded. `confirmed` is the server record
    /// when the publish response carried one.
    pub fn confirm_send(&mut self, client_id: &str, confirmed: Option<Message>) -> MergeOutcome {
        if let Some(mut message) = confirmed {
            if message.client_id.is_none() {
                message.client_id = Some(client_id.to_string());
            }
            if self.is_open(&message.conversation_id) {
                return self.upsert_new(message);
            }
            return MergeOutcome::Ignored;
        }
        let Some(m) = self.find_by_client_id_mut(client_id) else {
            return MergeOutcome::Missing;
        };
        match m.sync {
            SyncState::Pending { acked: false } => {
                m.sync = SyncState::Pending { acked: true };
                MergeOutcome::Updated
            }
            _ => MergeOutcome::Unchanged,
        }
    }

    /// The publish for `client_id` failed. A record already promoted by its
    /// echo is left alone: the server has it.
    pub fn fail_send(&mut self, client_id: &str, reason: impl Into<String>) -> MergeOutcome {
        let Some(m) = self.find_by_client_id_mut(client_id) else {
            return MergeOutcome::Missing;
        };
        if !m.is_local_only() || !matches!(m.sync, SyncState::Pending { .. }) {
            return MergeOutcome::Unchanged;
        }
        m.sync = SyncState::Failed {
            reason: reason.into(),
        };
        MergeOutcome::Updated
    }

    /// Put a failed send back into flight with the same correlation id.
    pub fn retry_send(&mut self, client_id: &str) -> Option<OutgoingSend> {
        let m = self.find_by_client_id_mut(client_id)?;
        if !matches!(m.sync, SyncState::Failed { .. }) {
            return None;
        }
        m.sync = SyncState::Pending { acked: false };
        Some(OutgoingSend {
            client_id: client_id.to_string(),
            conversation_id: m.conversation_id.clone(),
            body: m.body.clone(),
            reply_to: m.reply_to.clone(),
        })
    }

    /// Drop a failed send the user gave up on.
    pub fn discard(&mut self, client_id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| {
            !(m.client_id.as_deref() == Some(client_id)
                && m.is_local_only()
                && matches!(m.sync, SyncState::Failed { .. }))
        });
        self.messages.len() != before
    }

    // ---- optimistic edit / delete ------------------------------------------

    /// Apply an edit locally. Only the author may edit a confirmed message.
    pub fn edit_local(&mut self, message_id: &str, body: MessageBody) -> bool {
        let me = self.local_user_id.clone();
        let Some(m) = self.find_mut(message_id) else {
            return false;
        };
        if m.sender_id != me || m.sync != SyncState::Confirmed || m.body == body {
            return false;
        }
        let previous = std::mem::replace(&mut m.body, body.clone());
        let previous_edited = std::mem::replace(&mut m.edited, true);
        self.pending_edits
            .entry(message_id.to_string())
            .and_modify(|p| p.desired = body.clone())
            .or_insert(PendingEdit {
                previous,
                previous_edited,
                desired: body,
            });
        true
    }

    pub fn rollback_edit(&mut self, message_id: &str) -> bool {
        let Some(pending) = self.pending_edits.remove(message_id) else {
            return false;
        };
        let Some(m) = self.find_mut(message_id) else {
            return false;
        };
        m.body = pending.previous;
        m.edited = pending.previous_edited;
        true
    }

    /// Hide a message pending the server's confirmation.
    pub fn delete_local(&mut self, message_id: &str) -> bool {
        let me = self.local_user_id.clone();
        let Some(m) = self.find_mut(message_id) else {
            return false;
        };
        if m.sender_id != me || m.sync == SyncState::Deleting {
            return false;
        }
        let previous = std::mem::replace(&mut m.sync, SyncState::Deleting);
        self.pending_deletes.insert(message_id.to_string(), previous);
        true
    }

    /// The delete publish succeeded.
    pub fn confirm_delete(&mut self, message_id: &str) -> MergeOutcome {
        self.remove_confirmed(message_id)
    }

    pub fn rollback_delete(&mut self, message_id: &str) -> bool {
        let Some(previous) = self.pending_deletes.remove(message_id) else {
            return false;
        };
        let Some(m) = self.find_mut(message_id) else {
            return false;
        };
        m.sync = previous;
        true
    }

    // ---- optimistic reactions ---------------------------------------------

    /// Set (or with `None`, clear) the local user's reaction. Returns `false`
    /// when nothing changed or the message cannot take reactions yet.
    pub fn react_local(&mut self, message_id: &str, kind: Option<&str>) -> bool {
        let me = self.local_user_id.clone();
        let Some(m) = self.find_mut(message_id) else {
            return false;
        };
        if m.sync != SyncState::Confirmed {
            return false;
        }
        let previous = m.reactions.kind_of(&me).map(ToString::to_string);
        if previous.as_deref() == kind {
            return false;
        }
        m.reactions.set(&me, kind);
        self.pending_reactions
            .record(message_id, &me, previous, kind.map(ToString::to_string));
        true
    }

    pub fn rollback_reaction(&mut self, message_id: &str) -> bool {
        let me = self.local_user_id.clone();
        let Some(previous) = self.pending_reactions.rollback(message_id, &me) else {
            return false;
        };
        let Some(m) = self.find_mut(message_id) else {
            return false;
        };
        m.reactions.set(&me, previous.as_deref());
        true
    }

    pub fn has_pending_reaction(&self, message_id: &str) -> bool {
        self.pending_reactions
            .is_pending(message_id, &self.local_user_id)
    }

    // ---- internals --------------------------------------------------------

    fn find_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.id.as_deref() == Some(message_id))
    }

    fn find_by_client_id_mut(&mut self, client_id: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.client_id.as_deref() == Some(client_id))
    }

    fn remove_confirmed(&mut self, message_id: &str) -> MergeOutcome {
        self.tombstones.insert(message_id.to_string());
        self.pending_edits.remove(message_id);
        self.pending_deletes.remove(message_id);
        self.pending_reactions.forget_message(message_id);
        let before = self.messages.len();
        self.messages
            .retain(|m| m.id.as_deref() != Some(message_id));
        if self.messages.len() == before {
            MergeOutcome::Missing
        } else {
            MergeOutcome::Updated
        }
    }

    /// Insert keeping (created_at, seq) order. Assigns a fresh seq.
    fn insert(&mut self, mut message: Message) {
        self.next_seq += 1;
        message.seq = self.next_seq;
        self.place(message);
    }

    /// Insert keeping the message's existing seq.
    fn place(&mut self, message: Message) {
        let at = self
            .messages
            .partition_point(|m| m.sorts_before(&message));
        self.messages.insert(at, message);
    }

    /// Index of the pending optimistic record `incoming` confirms, if any.
    fn correlate(&self, incoming: &Message) -> Option<usize> {
        if incoming.sender_id != self.local_user_id {
            return None;
        }
        let candidates = self.messages.iter().enumerate().filter(|(_, m)| {
            m.is_local_only()
                && m.conversation_id == incoming.conversation_id
                && matches!(m.sync, SyncState::Pending { .. } | SyncState::Failed { .. })
        });
        if let Some(client_id) = incoming.client_id.as_deref() {
            return candidates
                .into_iter()
                .find(|(_, m)| m.client_id.as_deref() == Some(client_id))
                .map(|(i, _)| i);
        }
        // No correlation id echoed: the oldest pending record with the same body
        // inside the window.
        candidates
            .filter(|(_, m)| {
                m.body == incoming.body
                    && (m.created_at - incoming.created_at).abs() <= self.echo_window_ms
            })
            .min_by_key(|(_, m)| m.seq)
            .map(|(i, _)| i)
    }

    /// A `send` or publish receipt only creates or promotes. Later changes to
    /// a known id arrive as their own events, so a repeated copy is a no-op.
    fn upsert_new(&mut self, incoming: Message) -> MergeOutcome {
        match incoming.id.as_deref() {
            Some(id) if self.find(id).is_some() => MergeOutcome::Unchanged,
            _ => self.upsert(incoming),
        }
    }

    /// Idempotent upsert of a server record. History copies of known ids are
    /// merged into the existing record.
    fn upsert(&mut self, mut incoming: Message) -> MergeOutcome {
        let Some(id) = incoming.id.clone() else {
            return MergeOutcome::Unchanged;
        };
        if self.tombstones.contains(&id) {
            return MergeOutcome::Unchanged;
        }
        incoming.sync = SyncState::Confirmed;

        if let Some(idx) = self
            .messages
            .iter()
            .position(|m| m.id.as_deref() == Some(id.as_str()))
        {
            return self.update_at(idx, incoming);
        }

        if let Some(idx) = self.correlate(&incoming) {
            let mut local = self.messages.remove(idx);
            tracing::debug!(
                message_id = %id,
                client_id = ?local.client_id,
                "promoting optimistic message"
            );
            local.id = Some(id.clone());
            if incoming.client_id.is_some() {
                local.client_id = incoming.client_id;
            }
            local.body = incoming.body;
            local.created_at = incoming.created_at;
            local.edited = incoming.edited;
            local.status = local.status.max(incoming.status);
            local.reply_to = incoming.reply_to.or(local.reply_to);
            local.reactions = incoming.reactions;
            local.sync = SyncState::Confirmed;
            self.overlay_pending(&id, &mut local);
            self.place(local);
            return MergeOutcome::Promoted;
        }

        self.overlay_pending(&id, &mut incoming);
        self.insert(incoming);
        MergeOutcome::Inserted
    }

    fn update_at(&mut self, idx: usize, incoming: Message) -> MergeOutcome {
        let id = incoming.id.clone().unwrap_or_default();
        let mut next = self.messages[idx].clone();

        // An unedited history copy must not undo an edit.
        if incoming.edited || !next.edited {
            next.body = incoming.body;
            next.edited = incoming.edited || next.edited;
        }
        next.status = next.status.max(incoming.status);
        next.created_at = incoming.created_at;
        if incoming.reply_to.is_some() {
            next.reply_to = incoming.reply_to;
        }
        if next.client_id.is_none() {
            next.client_id = incoming.client_id;
        }
        next.reactions = incoming.reactions;
        if next.sync != SyncState::Deleting {
            next.sync = SyncState::Confirmed;
        }
        self.overlay_pending(&id, &mut next);

        if next == self.messages[idx] {
            return MergeOutcome::Unchanged;
        }
        let moved = next.created_at != self.messages[idx].created_at;
        if moved {
            self.messages.remove(idx);
            self.place(next);
        } else {
            self.messages[idx] = next;
        }
        MergeOutcome::Updated
    }

    /// Keep unconfirmed local edits/deletes/reactions visible on top of
    /// server-authoritative data.
    fn overlay_pending(&self, message_id: &str, m: &mut Message) {
        if let Some(edit) = self.pending_edits.get(message_id) {
            m.body = edit.desired.clone();
            m.edited = true;
        }
        if self.pending_deletes.contains_key(message_id) {
            m.sync = SyncState::Deleting;
        }
        self.pending_reactions.overlay(message_id, &mut m.reactions);
    }
}
