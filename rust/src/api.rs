//! REST side of the chat backend: history pages, the conversation list and
//! per-conversation settings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::LoadError;
use crate::sync::model::{ChatSettings, ConversationSummary, HistoryPage, Message};
use crate::sync::wire::{ChatRecord, PageRecord, SettingsPayload};

#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// `page` 0 is the newest; messages come back oldest-first.
    async fn fetch_history_page(
        &self,
        token: &str,
        conversation_id: &str,
        page: u32,
        size: u32,
    ) -> Result<HistoryPage, LoadError>;

    async fn fetch_chat_list(
        &self,
        token: &str,
        local_user_id: &str,
    ) -> Result<Vec<ConversationSummary>, LoadError>;

    async fn update_chat_settings(
        &self,
        token: &str,
        conversation_id: &str,
        settings: ChatSettings,
    ) -> Result<(), LoadError>;
}

pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, LoadError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LoadError::Status(status.as_u16()));
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| LoadError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_history_page(
        &self,
        token: &str,
        conversation_id: &str,
        page: u32,
        size: u32,
    ) -> Result<HistoryPage, LoadError> {
        let url = self.url(&format!("/api/chats/{conversation_id}/messages"));
        let record: PageRecord = self
            .get_json(
                token,
                &url,
                &[("page", page.to_string()), ("size", size.to_string())],
            )
            .await?;
        Ok(record.into_page())
    }

    async fn fetch_chat_list(
        &self,
        token: &str,
        local_user_id: &str,
    ) -> Result<Vec<ConversationSummary>, LoadError> {
        let url = self.url("/api/chats");
        let records: Vec<ChatRecord> = self.get_json(token, &url, &[]).await?;
        Ok(records
            .into_iter()
            .map(|r| r.into_summary(local_user_id))
            .collect())
    }

    async fn update_chat_settings(
        &self,
        token: &str,
        conversation_id: &str,
        settings: ChatSettings,
    ) -> Result<(), LoadError> {
        let url = self.url(&format!("/api/chats/{conversation_id}/settings"));
        let resp = self
            .client
            .put(&url)
            .bearer_auth(token)
            .json(&SettingsPayload {
                pinned: settings.pinned,
                muted: settings.muted,
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LoadError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    // conversation id -> full history, oldest first
    histories: HashMap<String, Vec<Message>>,
    chats: Vec<ConversationSummary>,
    fail_history: Option<LoadError>,
    fail_settings: Option<LoadError>,
    history_calls: Vec<(String, u32)>,
    settings_updates: Vec<(String, ChatSettings)>,
}

/// In-memory backend with the same paging arithmetic as the server. Backs
/// offline mode and tests.
#[derive(Default)]
pub struct MemoryChatApi {
    state: Mutex<MemoryState>,
}

impl MemoryChatApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn set_history(&self, conversation_id: &str, mut messages: Vec<Message>) {
        messages.sort_by_key(|m| m.created_at);
        self.lock()
            .histories
            .insert(conversation_id.to_string(), messages);
    }

    /// Record a message as persisted (what the server does on send).
    pub fn append(&self, message: Message) {
        self.lock()
            .histories
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    pub fn set_chats(&self, chats: Vec<ConversationSummary>) {
        self.lock().chats = chats;
    }

    pub fn fail_history_with(&self, error: Option<LoadError>) {
        self.lock().fail_history = error;
    }

    pub fn fail_settings_with(&self, error: Option<LoadError>) {
        self.lock().fail_settings = error;
    }

    pub fn history_calls(&self) -> Vec<(String, u32)> {
        self.lock().history_calls.clone()
    }

    pub fn settings_updates(&self) -> Vec<(String, ChatSettings)> {
        self.lock().settings_updates.clone()
    }
}

#[async_trait]
impl ChatApi for MemoryChatApi {
    async fn fetch_history_page(
        &self,
        _token: &str,
        conversation_id: &str,
        page: u32,
        size: u32,
    ) -> Result<HistoryPage, LoadError> {
        let mut st = self.lock();
        st.history_calls.push((conversation_id.to_string(), page));
        if let Some(err) = st.fail_history.clone() {
            return Err(err);
        }
        let all = st
            .histories
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let size = size.max(1) as usize;
        let total = all.len();
        let total_pages = total.div_ceil(size) as u32;
        // Page 0 is the newest `size` messages.
        let end = total.saturating_sub(page as usize * size);
        let start = end.saturating_sub(size);
        Ok(HistoryPage {
            messages: all[start..end].to_vec(),
            total_pages,
            number: page,
        })
    }

    async fn fetch_chat_list(
        &self,
        _token: &str,
        _local_user_id: &str,
    ) -> Result<Vec<ConversationSummary>, LoadError> {
        Ok(self.lock().chats.clone())
    }

    async fn update_chat_settings(
        &self,
        _token: &str,
        conversation_id: &str,
        settings: ChatSettings,
    ) -> Result<(), LoadError> {
        let mut st = self.lock();
        if let Some(err) = st.fail_settings.clone() {
            return Err(err);
        }
        st.settings_updates
            .push((conversation_id.to_string(), settings));
        if let Some(chat) = st
            .chats
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            chat.pinned = settings.pinned;
            chat.muted = settings.muted;
        }
        Ok(())
    }
}
