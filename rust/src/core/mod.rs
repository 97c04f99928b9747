mod chat;
mod config;
mod projection;
mod session;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::api::{ChatApi, HttpChatApi, MemoryChatApi};
use crate::state::{AppState, BusyState};
use crate::sync::{ChatContext, ChatListStore, MessageStore, StatusTracker};
use crate::transport::memory::MemoryTransport;
use crate::transport::stomp::StompTransport;
use crate::transport::{ConnectionManager, SubscriptionHandle, Transport};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

pub(crate) use config::default_app_config_json;
pub use config::SubscriptionMode;

/// The live transport and REST client a core talks to.
#[derive(Clone)]
pub struct Backend {
    pub transport: Arc<dyn Transport>,
    pub api: Arc<dyn ChatApi>,
}

impl Backend {
    fn from_config(config: &config::AppConfig) -> Self {
        if config::network_disabled(config) {
            tracing::info!("network disabled, using in-memory backend");
            return Self {
                transport: MemoryTransport::new(),
                api: MemoryChatApi::new(),
            };
        }
        Self {
            transport: Arc::new(StompTransport::new(config.ws_url())),
            api: Arc::new(HttpChatApi::new(config.api_base_url())),
        }
    }
}

/// Everything that only exists while logged in.
struct Session {
    user_id: String,
    token: String,
    connection: ConnectionManager,
    ctx: ChatContext,
    messages: MessageStore,
    chats: ChatListStore,
    acks: StatusTracker,
    // topic -> handle we hold on it
    subscriptions: HashMap<String, SubscriptionHandle>,
    subscribing: HashSet<String>,
    // Later connects are re-syncs.
    connected_once: bool,
    connect_in_flight: bool,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,
    backend: Backend,

    session: Option<Session>,
    // Bumped on login and logout; async results tagged with an older epoch are dropped.
    epoch: u64,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        backend: Option<Backend>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let backend = backend.unwrap_or_else(|| Backend::from_config(&config));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        tracing::info!(
            data_dir = %data_dir,
            mode = ?config.subscription_mode(),
            page_size = config.page_size(),
            "core ready"
        );

        let this = Self {
            state: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            backend,
            session: None,
            epoch: 0,
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Stays in state until the UI clears it, so a rev-gap resync still shows it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_state();
        }
    }

    fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// Report an async result back into the actor.
    fn send_internal(sender: &Sender<CoreMsg>, event: InternalEvent) {
        let _ = sender.send(CoreMsg::Internal(Box::new(event)));
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries the token and message bodies.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        let epoch = internal.epoch();
        if epoch != self.epoch || self.session.is_none() {
            tracing::debug!(epoch, current = self.epoch, "dropping stale result");
            return;
        }
        match internal {
            InternalEvent::Connected { result, .. } => self.on_connected(result),
            InternalEvent::Subscribed { topic, result, .. } => self.on_subscribed(topic, result),
            InternalEvent::Inbound { inbound, .. } => self.on_inbound(inbound),
            InternalEvent::ReconnectDue { .. } => self.start_connect(),
            InternalEvent::HistoryLoaded {
                request, result, ..
            } => self.on_history_loaded(request, result),
            InternalEvent::ChatListLoaded { result, .. } => self.on_chat_list_loaded(result),
            InternalEvent::SettingsUpdated {
                chat_id, result, ..
            } => self.on_settings_updated(chat_id, result),
            InternalEvent::SendPublished {
                chat_id,
                client_id,
                result,
                ..
            } => self.on_send_published(chat_id, client_id, result),
            InternalEvent::EditPublished {
                chat_id,
                message_id,
                result,
                ..
            } => self.on_edit_published(chat_id, message_id, result),
            InternalEvent::DeletePublished {
                chat_id,
                message_id,
                result,
                ..
            } => self.on_delete_published(chat_id, message_id, result),
            InternalEvent::ReactionPublished {
                chat_id,
                message_id,
                result,
                ..
            } => self.on_reaction_published(chat_id, message_id, result),
            InternalEvent::AckDue { request, .. } => self.on_ack_due(request),
            InternalEvent::AckPublished {
                request, result, ..
            } => self.on_ack_published(request, result),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Auth
            AppAction::Login { user_id, token } => self.login(user_id, token),
            AppAction::Logout => self.logout(),

            // Conversation
            AppAction::OpenChat { chat_id } => self.open_chat(chat_id),
            AppAction::CloseChat => self.close_chat(),
            AppAction::LoadOlderMessages { chat_id } => self.load_older(&chat_id),
            AppAction::ReloadChat { chat_id } => self.reload_chat(&chat_id),

            // Messages
            AppAction::SendMessage {
                chat_id,
                content,
                reply_to_message_id,
            } => self.send_text(&chat_id, content, reply_to_message_id),
            AppAction::SendFile {
                chat_id,
                file_url,
                reply_to_message_id,
            } => self.send_file(&chat_id, file_url, reply_to_message_id),
            AppAction::RetryMessage { chat_id, client_id } => self.retry_send(&chat_id, &client_id),
            AppAction::DiscardMessage { chat_id, client_id } => {
                self.discard_send(&chat_id, &client_id)
            }
            AppAction::EditMessage {
                chat_id,
                message_id,
                content,
            } => self.edit_message(&chat_id, &message_id, content),
            AppAction::DeleteMessage {
                chat_id,
                message_id,
            } => self.delete_message(&chat_id, &message_id),
            AppAction::React {
                chat_id,
                message_id,
                kind,
            } => self.react(&chat_id, &message_id, Some(kind)),
            AppAction::Unreact {
                chat_id,
                message_id,
            } => self.react(&chat_id, &message_id, None),

            // Chat list
            AppAction::SetChatPinned { chat_id, pinned } => {
                self.update_chat_settings(&chat_id, |s| s.pinned = pinned)
            }
            AppAction::SetChatMuted { chat_id, muted } => {
                self.update_chat_settings(&chat_id, |s| s.muted = muted)
            }
            AppAction::RefreshChatList => self.refresh_chat_list(),

            // UI
            AppAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }

            // Lifecycle
            AppAction::Foregrounded => self.foregrounded(),
        }
    }
}
