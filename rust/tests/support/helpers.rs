#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pawpal_core::api::MemoryChatApi;
use pawpal_core::sync::{Message, MessageBody};
use pawpal_core::transport::memory::MemoryTransport;
use pawpal_core::{
    AppAction, AppReconciler, AppState, AppUpdate, Backend, ChatMessage, ChatSummary,
    ConnectionState, FfiApp,
};
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn wait_until(what: &str, timeout: Duration, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, timeout, Duration::from_millis(20), f);
}

pub fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(poll);
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Fast timings for tests; `overrides` wins key by key.
pub fn write_config(data_dir: &str, overrides: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("pawpal_config.json");
    let mut v = serde_json::json!({
        "disable_network": true,
        "page_size": 20,
        "ack_stagger_ms": 0,
        "connect_max_attempts": 3,
        "connect_backoff_ms": 10,
        "publish_timeout_ms": 1000,
    });
    if let (Some(base), Some(extra)) = (v.as_object_mut(), overrides.as_object()) {
        for (k, val) in extra {
            base.insert(k.clone(), val.clone());
        }
    }
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

#[derive(Clone)]
pub struct Collector(pub Arc<Mutex<Vec<AppUpdate>>>);

impl Collector {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn last_toast(&self) -> Option<String> {
        self.0.lock().unwrap().iter().rev().find_map(|u| match u {
            AppUpdate::FullState(s) => s.toast.clone(),
        })
    }

    pub fn revs(&self) -> Vec<u64> {
        self.0.lock().unwrap().iter().map(AppUpdate::rev).collect()
    }
}

impl AppReconciler for Collector {
    fn reconcile(&self, update: AppUpdate) {
        self.0.lock().unwrap().push(update);
    }
}

/// One app wired to an in-memory server.
pub struct Harness {
    pub app: Arc<FfiApp>,
    pub transport: Arc<MemoryTransport>,
    pub api: Arc<MemoryChatApi>,
    pub updates: Collector,
    _dir: TempDir,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with_config(serde_json::json!({}))
    }

    pub fn start_with_config(overrides: serde_json::Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_string_lossy().to_string();
        write_config(&data_dir, overrides);

        let transport = MemoryTransport::new();
        let api = MemoryChatApi::new();
        let app = FfiApp::new_with_backend(
            data_dir,
            Backend {
                transport: transport.clone(),
                api: api.clone(),
            },
        );
        let updates = Collector::new();
        app.listen_for_updates(Box::new(updates.clone()));

        Self {
            app,
            transport,
            api,
            updates,
            _dir: dir,
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        self.app.dispatch(action);
    }

    pub fn state(&self) -> AppState {
        self.app.state()
    }

    /// Log in and wait until the live connection is up with the user queues subscribed.
    pub fn login(&self, user_id: &str) {
        self.dispatch(AppAction::Login {
            user_id: user_id.into(),
            token: "test-token".into(),
        });
        let messages = format!("/user/{user_id}/queue/messages");
        let reactions = format!("/user/{user_id}/queue/reactions");
        wait_until("connected and subscribed", TIMEOUT, || {
            let topics = self.transport.subscribed_topics();
            self.state().connection == ConnectionState::Connected
                && topics.contains(&messages)
                && topics.contains(&reactions)
        });
    }

    pub fn open_chat(&self, chat_id: &str) {
        self.dispatch(AppAction::OpenChat {
            chat_id: chat_id.into(),
        });
        wait_until("initial page loaded", TIMEOUT, || {
            self.state()
                .current_chat
                .is_some_and(|c| c.chat_id == chat_id && !c.is_loading)
        });
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state()
            .current_chat
            .map(|c| c.messages)
            .unwrap_or_default()
    }

    pub fn chat(&self, chat_id: &str) -> Option<ChatSummary> {
        self.state()
            .chat_list
            .into_iter()
            .find(|c| c.chat_id == chat_id)
    }

    /// Deliver a frame on the user's message queue.
    pub fn push_message_frame(&self, user_id: &str, frame: serde_json::Value) {
        let topic = format!("/user/{user_id}/queue/messages");
        assert!(
            self.transport.push(&topic, frame.to_string()),
            "not subscribed to {topic}"
        );
    }

    pub fn published_json(&self, destination: &str) -> Vec<serde_json::Value> {
        self.transport
            .published_to(destination)
            .iter()
            .map(|b| serde_json::from_str(b).unwrap())
            .collect()
    }
}

pub fn text_message(id: &str, chat_id: &str, sender: &str, text: &str, ts: i64) -> Message {
    Message::confirmed(id, chat_id, sender, MessageBody::Text(text.into()), ts)
}

pub fn send_frame(
    id: &str,
    chat_id: &str,
    sender: &str,
    content: &str,
    ts: i64,
    client_id: Option<&str>,
) -> serde_json::Value {
    serde_json::json!({
        "type": "SEND",
        "message": {
            "id": id,
            "chatId": chat_id,
            "senderId": sender,
            "content": content,
            "isFile": false,
            "timestamp": ts,
            "status": "SENT",
            "clientId": client_id,
        }
    })
}

pub fn ref_frame(kind: &str, id: &str, chat_id: &str) -> serde_json::Value {
    serde_json::json!({
        "type": kind,
        "message": { "id": id, "chatId": chat_id }
    })
}
