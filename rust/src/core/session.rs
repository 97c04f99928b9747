// Session lifecycle, the live connection, and the inbound event path.

use super::*;

use crate::error::{ConnectError, PublishError};
use crate::state::{AuthState, ConnectionState};
use crate::sync::{wire, LiveEvent};
use crate::transport::{Credentials, Inbound};

impl AppCore {
    pub(super) fn login(&mut self, user_id: String, token: String) {
        let user_id = user_id.trim().to_string();
        let token = token.trim().to_string();
        if user_id.is_empty() || token.is_empty() {
            self.toast("Enter a user id and token");
            return;
        }
        self.set_busy(|b| b.logging_in = true);
        self.start_session(user_id, token);
    }

    pub(super) fn logout(&mut self) {
        self.stop_session();
        self.state = AppState {
            rev: self.rev,
            ..AppState::empty()
        };
        self.emit_state();
    }

    fn start_session(&mut self, user_id: String, token: String) {
        // Tear down any existing session first.
        self.stop_session();
        tracing::info!(%user_id, epoch = self.epoch, "start_session");

        let connection = ConnectionManager::new(
            self.backend.transport.clone(),
            self.config.retry_policy(),
            self.config.publish_timeout(),
        );
        let messages = MessageStore::new(&user_id, self.config.page_size())
            .with_echo_window_ms(self.config.echo_match_window_ms());

        self.session = Some(Session {
            user_id: user_id.clone(),
            token,
            connection,
            ctx: ChatContext::new(&user_id),
            messages,
            chats: ChatListStore::new(&user_id),
            acks: StatusTracker::new(self.config.ack_stagger()),
            subscriptions: HashMap::new(),
            subscribing: HashSet::new(),
            connected_once: false,
            connect_in_flight: false,
        });

        self.state.auth = AuthState::LoggedIn { user_id };
        self.state.connection = ConnectionState::Connecting;
        self.state.chat_list = vec![];
        self.state.current_chat = None;
        self.emit_state();

        self.start_connect();
        self.refresh_chat_list();
    }

    fn stop_session(&mut self) {
        // Invalidate in-flight connects, fetches and publishes.
        self.epoch = self.epoch.wrapping_add(1);

        if let Some(sess) = self.session.take() {
            tracing::info!(user_id = %sess.user_id, "stop_session");
            // Block so a following login cannot race the old close on the shared transport.
            let connection = sess.connection.clone();
            self.runtime.block_on(async move {
                connection.disconnect().await;
            });
        }
    }

    pub(super) fn start_connect(&mut self) {
        let epoch = self.epoch;
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if sess.connect_in_flight || sess.connection.is_connected() {
            return;
        }
        sess.connect_in_flight = true;

        let connection = sess.connection.clone();
        let credentials = Credentials {
            user_id: sess.user_id.clone(),
            token: sess.token.clone(),
        };
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let (inbound_tx, inbound_rx) = flume::unbounded::<Inbound>();
            let forward = tx.clone();
            tokio::spawn(async move {
                // Ends once the transport drops its sender.
                while let Ok(inbound) = inbound_rx.recv_async().await {
                    AppCore::send_internal(&forward, InternalEvent::Inbound { epoch, inbound });
                }
            });
            let result = connection.connect(&credentials, inbound_tx).await;
            AppCore::send_internal(&tx, InternalEvent::Connected { epoch, result });
        });

        if self.state.connection != ConnectionState::Connecting {
            self.state.connection = ConnectionState::Connecting;
            self.emit_state();
        }
    }

    pub(super) fn on_connected(&mut self, result: Result<(), ConnectError>) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        sess.connect_in_flight = false;
        self.state.busy.logging_in = false;

        match result {
            Ok(()) => {
                let resync = sess.connected_once;
                sess.connected_once = true;
                sess.subscriptions.clear();
                sess.subscribing.clear();
                self.state.connection = ConnectionState::Connected;
                self.emit_state();

                self.sync_subscriptions();
                if resync {
                    self.resync();
                } else {
                    self.schedule_acks();
                }
            }
            Err(err) => {
                tracing::warn!(%err, "connect failed");
                self.state.connection = ConnectionState::Failed {
                    reason: err.to_string(),
                };
                let msg = match &err {
                    ConnectError::Auth(_) => format!("Sign-in rejected: {err}"),
                    _ => format!("Can't reach the chat server: {err}"),
                };
                self.toast(msg);
            }
        }
    }

    /// After a reconnect: the open conversation and the list may have missed
    /// events while the connection was down.
    fn resync(&mut self) {
        tracing::info!("re-syncing after reconnect");
        if let Some(sess) = self.session.as_mut() {
            sess.acks.retry_parked();
        }
        if let Some(chat_id) = self
            .session
            .as_ref()
            .and_then(|s| s.ctx.open_conversation.clone())
        {
            self.reload_chat(&chat_id);
        }
        self.refresh_chat_list();
        self.schedule_acks();
    }

    pub(super) fn foregrounded(&mut self) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if !sess.connection.is_connected() && !sess.connect_in_flight {
            tracing::info!("foregrounded while disconnected, reconnecting");
            self.start_connect();
        }
        self.refresh_chat_list();
    }

    /// User queues always; the open conversation's topic in per-conversation mode.
    fn wanted_topics(&self) -> Vec<String> {
        let Some(sess) = self.session.as_ref() else {
            return vec![];
        };
        let mut topics = vec![
            wire::user_messages_topic(&sess.user_id),
            wire::user_reactions_topic(&sess.user_id),
        ];
        if self.config.subscription_mode() == SubscriptionMode::PerConversation {
            if let Some(chat_id) = sess.ctx.open_conversation.as_deref() {
                topics.push(wire::conversation_topic(chat_id));
            }
        }
        topics
    }

    pub(super) fn sync_subscriptions(&mut self) {
        let wanted = self.wanted_topics();
        let epoch = self.epoch;
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if !sess.connection.is_connected() {
            return;
        }

        let stale: Vec<String> = sess
            .subscriptions
            .keys()
            .filter(|t| !wanted.contains(t))
            .cloned()
            .collect();
        for topic in stale {
            if let Some(handle) = sess.subscriptions.remove(&topic) {
                let connection = sess.connection.clone();
                self.runtime.spawn(async move {
                    connection.unsubscribe(handle).await;
                });
            }
        }

        for topic in wanted {
            if sess.subscriptions.contains_key(&topic) || !sess.subscribing.insert(topic.clone()) {
                continue;
            }
            let connection = sess.connection.clone();
            let tx = self.core_sender.clone();
            self.runtime.spawn(async move {
                let result = connection.subscribe(&topic).await;
                AppCore::send_internal(
                    &tx,
                    InternalEvent::Subscribed {
                        epoch,
                        topic,
                        result,
                    },
                );
            });
        }
    }

    pub(super) fn on_subscribed(
        &mut self,
        topic: String,
        result: Result<SubscriptionHandle, PublishError>,
    ) {
        let wanted = self.wanted_topics().contains(&topic);
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        sess.subscribing.remove(&topic);
        match result {
            Ok(handle) if wanted => {
                sess.subscriptions.insert(topic, handle);
            }
            Ok(handle) => {
                // The conversation was closed while the subscribe was in flight.
                let connection = sess.connection.clone();
                self.runtime.spawn(async move {
                    connection.unsubscribe(handle).await;
                });
            }
            Err(PublishError::NotConnected) => {
                tracing::debug!(%topic, "subscribe skipped, not connected");
            }
            Err(err) => {
                tracing::warn!(%topic, %err, "subscribe failed");
            }
        }
    }

    pub(super) fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Frame { topic, body } => match wire::parse_live_event(&body) {
                Ok(Some(event)) => self.handle_live_event(event),
                Ok(None) => tracing::debug!(%topic, "ignoring unhandled frame type"),
                Err(err) => tracing::warn!(%topic, %err, "dropping malformed frame"),
            },
            Inbound::Closed { reason } => self.on_connection_lost(reason),
        }
    }

    fn on_connection_lost(&mut self, reason: String) {
        let epoch = self.epoch;
        let delay = self.config.retry_policy().backoff(1);
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        tracing::warn!(%reason, "live connection closed");
        sess.connection.connection_lost();
        sess.subscriptions.clear();
        sess.subscribing.clear();
        if sess.connect_in_flight {
            return;
        }

        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            AppCore::send_internal(&tx, InternalEvent::ReconnectDue { epoch });
        });
        self.state.connection = ConnectionState::Connecting;
        self.emit_state();
    }

    /// The one place live events enter: the open conversation and the chat
    /// list each see every event.
    pub(super) fn handle_live_event(&mut self, event: LiveEvent) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        tracing::debug!(
            kind = event.tag(),
            conversation_id = %event.conversation_id(),
            "live event"
        );
        let outcome = sess.messages.apply_live_event(&event);
        let list_changed = sess.chats.apply_live_event(&event, &sess.ctx);

        if outcome.changed() {
            if matches!(
                event,
                LiveEvent::Send { .. } | LiveEvent::StatusUpdate { .. }
            ) {
                self.schedule_acks();
            }
            self.refresh_current_chat();
        }
        if list_changed {
            self.refresh_chat_list_state();
        }
        if outcome.changed() || list_changed {
            self.emit_state();
        }
    }
}
