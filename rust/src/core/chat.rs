// Conversation actions, optimistic mutations, acknowledgements and chat list
// settings. Network work is spawned on the runtime and reports back through
// `InternalEvent`s; the stores are only touched here on the actor thread.

use super::*;

use crate::error::{LoadError, PublishError};
use crate::state::now_millis;
use crate::sync::{
    wire, AckRequest, ChatSettings, ConversationSummary, HistoryPage, LiveEvent, MessageBody,
    OutgoingSend, PageRequest,
};
use crate::transport::PublishAck;

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl AppCore {
    /// The session, if `chat_id` is the conversation on screen.
    fn open_session(&mut self, chat_id: &str) -> Option<&mut Session> {
        let sess = self.session.as_mut()?;
        if !sess.messages.is_open(chat_id) {
            tracing::debug!(%chat_id, "ignoring action for a chat that is not open");
            return None;
        }
        Some(sess)
    }

    fn spawn_publish(
        &self,
        destination: &'static str,
        payload: String,
        done: impl FnOnce(Result<PublishAck, PublishError>) -> InternalEvent + Send + 'static,
    ) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let connection = sess.connection.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = connection.publish(destination, &payload).await;
            AppCore::send_internal(&tx, done(result));
        });
    }

    // ---- conversation -----------------------------------------------------

    pub(super) fn open_chat(&mut self, chat_id: String) {
        let chat_id = chat_id.trim().to_string();
        if chat_id.is_empty() {
            return;
        }
        if !self.is_logged_in() {
            self.toast("Log in first");
            return;
        }
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if sess.messages.is_open(&chat_id) {
            return;
        }
        tracing::info!(%chat_id, "open chat");
        sess.messages.open(chat_id.clone());
        sess.ctx.open_conversation = Some(chat_id.clone());
        // Reopening makes parked acknowledgements eligible again.
        sess.acks.reset();
        sess.chats.mark_opened(&chat_id);
        let request = sess.messages.begin_initial_load();

        if let Some(request) = request {
            self.spawn_history_fetch(request);
        }
        self.sync_subscriptions();
        self.refresh_current_chat();
        self.refresh_chat_list_state();
        self.emit_state();
    }

    pub(super) fn close_chat(&mut self) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let Some(chat_id) = sess.ctx.open_conversation.take() else {
            return;
        };
        tracing::info!(%chat_id, "close chat");
        sess.messages.close();
        sess.acks.reset();

        self.sync_subscriptions();
        self.state.current_chat = None;
        self.emit_state();
    }

    pub(super) fn load_older(&mut self, chat_id: &str) {
        let Some(sess) = self.open_session(chat_id) else {
            return;
        };
        let Some(request) = sess.messages.begin_load_earlier() else {
            tracing::debug!(%chat_id, "nothing older to load");
            return;
        };
        self.spawn_history_fetch(request);
        self.refresh_current_chat();
        self.emit_state();
    }

    /// Refetch the newest page. Used by the retry banner and after a reconnect.
    pub(super) fn reload_chat(&mut self, chat_id: &str) {
        let Some(sess) = self.open_session(chat_id) else {
            return;
        };
        let Some(request) = sess.messages.begin_initial_load() else {
            return;
        };
        self.spawn_history_fetch(request);
        self.refresh_current_chat();
        self.emit_state();
    }

    fn spawn_history_fetch(&mut self, request: PageRequest) {
        let epoch = self.epoch;
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let api = self.backend.api.clone();
        let token = sess.token.clone();
        let tx = self.core_sender.clone();
        tracing::debug!(
            chat_id = %request.conversation_id,
            page = request.page,
            size = request.size,
            "fetching history"
        );
        self.runtime.spawn(async move {
            let result = api
                .fetch_history_page(
                    &token,
                    &request.conversation_id,
                    request.page,
                    request.size,
                )
                .await;
            AppCore::send_internal(
                &tx,
                InternalEvent::HistoryLoaded {
                    epoch,
                    request,
                    result,
                },
            );
        });
    }

    pub(super) fn on_history_loaded(
        &mut self,
        request: PageRequest,
        result: Result<HistoryPage, LoadError>,
    ) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let applied = match result {
            Ok(page) => {
                tracing::debug!(
                    chat_id = %request.conversation_id,
                    page = page.number,
                    total_pages = page.total_pages,
                    count = page.messages.len(),
                    "history page"
                );
                sess.messages.apply_page(&request, page)
            }
            Err(err) => {
                tracing::warn!(
                    chat_id = %request.conversation_id,
                    page = request.page,
                    %err,
                    "history fetch failed"
                );
                sess.messages.fail_page(&request, err)
            }
        };
        if !applied {
            return;
        }
        self.schedule_acks();
        self.refresh_current_chat();
        self.emit_state();
    }

    // ---- sends --------------------------------------------------------------

    pub(super) fn send_text(&mut self, chat_id: &str, content: String, reply_to: Option<String>) {
        if content.trim().is_empty() {
            return;
        }
        self.send_body(chat_id, MessageBody::Text(content), reply_to);
    }

    pub(super) fn send_file(&mut self, chat_id: &str, file_url: String, reply_to: Option<String>) {
        let url = file_url.trim();
        if url.is_empty() {
            self.toast("Missing file");
            return;
        }
        let body = MessageBody::File {
            url: url.to_string(),
        };
        self.send_body(chat_id, body, reply_to);
    }

    fn send_body(&mut self, chat_id: &str, body: MessageBody, reply_to: Option<String>) {
        let Some(sess) = self.open_session(chat_id) else {
            return;
        };
        let Some(outgoing) = sess
            .messages
            .send_optimistic(body, non_blank(reply_to), now_millis())
        else {
            return;
        };
        if let Some(m) = sess.messages.find_by_client_id(&outgoing.client_id) {
            sess.chats.record_local_send(m);
        }
        tracing::info!(%chat_id, client_id = %outgoing.client_id, "send");

        self.publish_send(outgoing);
        self.refresh_current_chat();
        self.refresh_chat_list_state();
        self.emit_state();
    }

    fn publish_send(&self, outgoing: OutgoingSend) {
        let payload = wire::send_payload(
            &outgoing.conversation_id,
            &outgoing.client_id,
            &outgoing.body,
            outgoing.reply_to.as_deref(),
        );
        let epoch = self.epoch;
        let chat_id = outgoing.conversation_id;
        let client_id = outgoing.client_id;
        self.spawn_publish(wire::DEST_SEND, payload, move |result| {
            InternalEvent::SendPublished {
                epoch,
                chat_id,
                client_id,
                result,
            }
        });
    }

    pub(super) fn on_send_published(
        &mut self,
        chat_id: String,
        client_id: String,
        result: Result<PublishAck, PublishError>,
    ) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let outcome = match result {
            Ok(ack) => {
                let confirmed = ack
                    .body
                    .as_deref()
                    .and_then(wire::parse_receipt_message)
                    .map(|mut m| {
                        if m.client_id.is_none() {
                            m.client_id = Some(client_id.clone());
                        }
                        m
                    });
                let mut list_changed = false;
                if let Some(m) = confirmed.as_ref() {
                    // A receipt record counts as the echo for the list too.
                    let event = LiveEvent::Send { message: m.clone() };
                    list_changed = sess.chats.apply_live_event(&event, &sess.ctx);
                }
                let outcome = sess.messages.confirm_send(&client_id, confirmed);
                if list_changed {
                    self.refresh_chat_list_state();
                }
                outcome.changed() || list_changed
            }
            Err(err) => {
                tracing::warn!(%chat_id, %client_id, %err, "send failed");
                let outcome = sess.messages.fail_send(&client_id, err.to_string());
                if outcome == crate::sync::MergeOutcome::Missing {
                    // The conversation was closed; nothing left on screen to mark.
                    self.toast(format!("Message not sent: {err}"));
                    return;
                }
                outcome.changed()
            }
        };
        if outcome {
            self.refresh_current_chat();
            self.emit_state();
        }
    }

    pub(super) fn retry_send(&mut self, chat_id: &str, client_id: &str) {
        let Some(sess) = self.open_session(chat_id) else {
            return;
        };
        let Some(outgoing) = sess.messages.retry_send(client_id) else {
            tracing::debug!(%client_id, "nothing to retry");
            return;
        };
        tracing::info!(%chat_id, %client_id, "retry send");
        self.publish_send(outgoing);
        self.refresh_current_chat();
        self.emit_state();
    }

    pub(super) fn discard_send(&mut self, chat_id: &str, client_id: &str) {
        let Some(sess) = self.open_session(chat_id) else {
            return;
        };
        if !sess.messages.discard(client_id) {
            return;
        }
        let newest = sess.messages.visible().last();
        let preview_changed = sess.chats.discard_local_send(chat_id, client_id, newest);
        self.refresh_current_chat();
        if preview_changed {
            self.refresh_chat_list_state();
        }
        self.emit_state();
    }

    // ---- edit / delete / react ----------------------------------------------

    pub(super) fn edit_message(&mut self, chat_id: &str, message_id: &str, content: String) {
        if content.trim().is_empty() {
            return;
        }
        let body = MessageBody::Text(content);
        let Some(sess) = self.open_session(chat_id) else {
            return;
        };
        if !sess.messages.edit_local(message_id, body.clone()) {
            tracing::debug!(%message_id, "edit not applicable");
            return;
        }
        let payload = wire::edit_payload(message_id, &body);
        let epoch = self.epoch;
        let (chat, id) = (chat_id.to_string(), message_id.to_string());
        self.spawn_publish(wire::DEST_EDIT, payload, move |result| {
            InternalEvent::EditPublished {
                epoch,
                chat_id: chat,
                message_id: id,
                result: result.map(|_| ()),
            }
        });
        self.refresh_current_chat();
        self.emit_state();
    }

    pub(super) fn on_edit_published(
        &mut self,
        chat_id: String,
        message_id: String,
        result: Result<(), PublishError>,
    ) {
        let Err(err) = result else {
            // Confirmed by the live `edit` event.
            return;
        };
        tracing::warn!(%chat_id, %message_id, %err, "edit failed");
        let rolled_back = self
            .session
            .as_mut()
            .is_some_and(|s| s.messages.rollback_edit(&message_id));
        if rolled_back {
            self.refresh_current_chat();
        }
        self.toast(format!("Edit failed: {err}"));
    }

    pub(super) fn delete_message(&mut self, chat_id: &str, message_id: &str) {
        let Some(sess) = self.open_session(chat_id) else {
            return;
        };
        if !sess.messages.delete_local(message_id) {
            tracing::debug!(%message_id, "delete not applicable");
            return;
        }
        let payload = wire::message_ref_payload(message_id);
        let epoch = self.epoch;
        let (chat, id) = (chat_id.to_string(), message_id.to_string());
        self.spawn_publish(wire::DEST_DELETE, payload, move |result| {
            InternalEvent::DeletePublished {
                epoch,
                chat_id: chat,
                message_id: id,
                result: result.map(|_| ()),
            }
        });
        self.refresh_current_chat();
        self.emit_state();
    }

    pub(super) fn on_delete_published(
        &mut self,
        chat_id: String,
        message_id: String,
        result: Result<(), PublishError>,
    ) {
        match result {
            Ok(()) => {
                // Same effect as the server's `delete` echo, which may come later or not at all.
                self.handle_live_event(LiveEvent::Delete {
                    conversation_id: chat_id,
                    message_id,
                });
            }
            Err(err) => {
                tracing::warn!(%chat_id, %message_id, %err, "delete failed");
                let rolled_back = self
                    .session
                    .as_mut()
                    .is_some_and(|s| s.messages.rollback_delete(&message_id));
                if rolled_back {
                    self.refresh_current_chat();
                }
                self.toast(format!("Delete failed: {err}"));
            }
        }
    }

    /// `kind: None` removes the local user's reaction.
    pub(super) fn react(&mut self, chat_id: &str, message_id: &str, kind: Option<String>) {
        let kind = non_blank(kind);
        let Some(sess) = self.open_session(chat_id) else {
            return;
        };
        if !sess.messages.react_local(message_id, kind.as_deref()) {
            return;
        }
        let (destination, payload) = match kind.as_deref() {
            Some(kind) => (wire::DEST_REACT, wire::react_payload(message_id, kind)),
            None => (wire::DEST_UNREACT, wire::message_ref_payload(message_id)),
        };
        let epoch = self.epoch;
        let (chat, id) = (chat_id.to_string(), message_id.to_string());
        self.spawn_publish(destination, payload, move |result| {
            InternalEvent::ReactionPublished {
                epoch,
                chat_id: chat,
                message_id: id,
                result: result.map(|_| ()),
            }
        });
        self.refresh_current_chat();
        self.emit_state();
    }

    pub(super) fn on_reaction_published(
        &mut self,
        chat_id: String,
        message_id: String,
        result: Result<(), PublishError>,
    ) {
        let Err(err) = result else {
            return;
        };
        tracing::warn!(%chat_id, %message_id, %err, "reaction failed");
        let rolled_back = self
            .session
            .as_mut()
            .is_some_and(|s| s.messages.rollback_reaction(&message_id));
        if rolled_back {
            self.refresh_current_chat();
        }
        self.toast(format!("Reaction failed: {err}"));
    }

    // ---- acknowledgements ---------------------------------------------------

    pub(super) fn schedule_acks(&mut self) {
        let epoch = self.epoch;
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if !sess.connection.is_connected() {
            return;
        }
        let requests = sess.acks.plan(&sess.ctx, sess.messages.messages());
        for request in requests {
            let tx = self.core_sender.clone();
            self.runtime.spawn(async move {
                if !request.delay.is_zero() {
                    tokio::time::sleep(request.delay).await;
                }
                AppCore::send_internal(&tx, InternalEvent::AckDue { epoch, request });
            });
        }
    }

    pub(super) fn on_ack_due(&mut self, request: AckRequest) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if !sess.acks.is_due(&sess.ctx, &request) {
            sess.acks.cancel(&request);
            return;
        }
        let payload = wire::status_payload(&request.message_id, request.status);
        let epoch = self.epoch;
        self.spawn_publish(wire::DEST_STATUS, payload, move |result| {
            InternalEvent::AckPublished {
                epoch,
                request,
                result: result.map(|_| ()),
            }
        });
    }

    pub(super) fn on_ack_published(&mut self, request: AckRequest, result: Result<(), PublishError>) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if !sess.acks.on_published(&request, result.as_ref().map(|_| ())) {
            return;
        }
        self.handle_live_event(LiveEvent::StatusUpdate {
            conversation_id: request.conversation_id,
            message_id: request.message_id,
            status: request.status,
        });
        // `read` follows `delivered` even when an echo already advanced the status.
        self.schedule_acks();
    }

    // ---- chat list ----------------------------------------------------------

    pub(super) fn refresh_chat_list(&mut self) {
        let epoch = self.epoch;
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let api = self.backend.api.clone();
        let token = sess.token.clone();
        let user_id = sess.user_id.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.fetch_chat_list(&token, &user_id).await;
            AppCore::send_internal(&tx, InternalEvent::ChatListLoaded { epoch, result });
        });
        self.set_busy(|b| b.loading_chat_list = true);
    }

    pub(super) fn on_chat_list_loaded(&mut self, result: Result<Vec<ConversationSummary>, LoadError>) {
        self.state.busy.loading_chat_list = false;
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        match result {
            Ok(list) => {
                tracing::debug!(count = list.len(), "chat list loaded");
                sess.chats.replace_all(list, &sess.ctx);
                self.refresh_chat_list_state();
                self.refresh_current_chat();
                self.emit_state();
            }
            Err(err) => {
                tracing::warn!(%err, "chat list fetch failed");
                self.toast(format!("Couldn't load chats: {err}"));
            }
        }
    }

    pub(super) fn update_chat_settings(&mut self, chat_id: &str, f: impl FnOnce(&mut ChatSettings)) {
        let epoch = self.epoch;
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let Some(settings) = sess.chats.update_settings(chat_id, f) else {
            return;
        };
        let api = self.backend.api.clone();
        let token = sess.token.clone();
        let tx = self.core_sender.clone();
        let chat_id = chat_id.to_string();
        tracing::info!(%chat_id, pinned = settings.pinned, muted = settings.muted, "update chat settings");
        self.runtime.spawn(async move {
            let result = api.update_chat_settings(&token, &chat_id, settings).await;
            AppCore::send_internal(
                &tx,
                InternalEvent::SettingsUpdated {
                    epoch,
                    chat_id,
                    result,
                },
            );
        });
        self.refresh_chat_list_state();
        self.emit_state();
    }

    pub(super) fn on_settings_updated(&mut self, chat_id: String, result: Result<(), LoadError>) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        match result {
            Ok(()) => sess.chats.confirm_settings(&chat_id),
            Err(err) => {
                tracing::warn!(%chat_id, %err, "chat settings update failed");
                if sess.chats.rollback_settings(&chat_id) {
                    self.refresh_chat_list_state();
                }
                self.toast(format!("Couldn't update chat: {err}"));
            }
        }
    }
}
