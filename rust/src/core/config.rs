use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::transport::RetryPolicy;

pub(crate) const CONFIG_FILE: &str = "pawpal_config.json";

const DEFAULT_API_BASE_URL: &str = "https://api.pawpal.app";
const DEFAULT_WS_URL: &str = "wss://api.pawpal.app/ws";
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_ACK_STAGGER_MS: u64 = 150;
const DEFAULT_CONNECT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_CONNECT_BACKOFF_MS: u64 = 500;
const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_ECHO_MATCH_WINDOW_MS: i64 = crate::sync::message_store::DEFAULT_ECHO_WINDOW_MS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionMode {
    /// Only the user queues (`/user/{id}/queue/messages` and `.../reactions`).
    #[default]
    PerUser,
    /// The user queues plus `/topic/chat/{id}` while that conversation is open.
    PerConversation,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) disable_network: Option<bool>,
    pub(crate) api_base_url: Option<String>,
    pub(crate) ws_url: Option<String>,
    pub(crate) subscription_mode: Option<SubscriptionMode>,
    pub(crate) page_size: Option<u32>,
    pub(crate) ack_stagger_ms: Option<u64>,
    pub(crate) connect_max_attempts: Option<u32>,
    pub(crate) connect_backoff_ms: Option<u64>,
    pub(crate) publish_timeout_ms: Option<u64>,
    pub(crate) echo_match_window_ms: Option<i64>,
}

impl AppConfig {
    pub(crate) fn api_base_url(&self) -> String {
        non_empty(self.api_base_url.as_deref()).unwrap_or(DEFAULT_API_BASE_URL).to_string()
    }

    pub(crate) fn ws_url(&self) -> String {
        non_empty(self.ws_url.as_deref()).unwrap_or(DEFAULT_WS_URL).to_string()
    }

    pub(crate) fn subscription_mode(&self) -> SubscriptionMode {
        self.subscription_mode.unwrap_or_default()
    }

    pub(crate) fn page_size(&self) -> u32 {
        self.page_size.filter(|n| *n > 0).unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub(crate) fn ack_stagger(&self) -> Duration {
        Duration::from_millis(self.ack_stagger_ms.unwrap_or(DEFAULT_ACK_STAGGER_MS))
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(
            self.connect_backoff_ms
                .unwrap_or(DEFAULT_CONNECT_BACKOFF_MS),
        );
        RetryPolicy {
            max_attempts: self
                .connect_max_attempts
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_CONNECT_MAX_ATTEMPTS),
            base_delay: base,
            max_delay: base.saturating_mul(64),
        }
    }

    pub(crate) fn publish_timeout(&self) -> Duration {
        Duration::from_millis(
            self.publish_timeout_ms
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_PUBLISH_TIMEOUT_MS),
        )
    }

    pub(crate) fn echo_match_window_ms(&self) -> i64 {
        self.echo_match_window_ms
            .unwrap_or(DEFAULT_ECHO_MATCH_WINDOW_MS)
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn read_app_config(path: &Path) -> anyhow::Result<Option<AppConfig>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let config = serde_json::from_slice::<AppConfig>(&bytes)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(config))
}

pub(crate) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    match read_app_config(&path) {
        Ok(config) => config.unwrap_or_default(),
        Err(err) => {
            tracing::warn!("ignoring config: {err:#}");
            AppConfig::default()
        }
    }
}

/// The config file contents an app would ship with: every key at its default.
pub(crate) fn default_app_config_json() -> String {
    let defaults = serde_json::json!({
        "disable_network": false,
        "api_base_url": DEFAULT_API_BASE_URL,
        "ws_url": DEFAULT_WS_URL,
        "subscription_mode": SubscriptionMode::default(),
        "page_size": DEFAULT_PAGE_SIZE,
        "ack_stagger_ms": DEFAULT_ACK_STAGGER_MS,
        "connect_max_attempts": DEFAULT_CONNECT_MAX_ATTEMPTS,
        "connect_backoff_ms": DEFAULT_CONNECT_BACKOFF_MS,
        "publish_timeout_ms": DEFAULT_PUBLISH_TIMEOUT_MS,
        "echo_match_window_ms": DEFAULT_ECHO_MATCH_WINDOW_MS,
    });
    serde_json::to_string_pretty(&defaults).unwrap_or_else(|_| "{}".to_string())
}

pub(crate) fn network_disabled(config: &AppConfig) -> bool {
    // Keeps Rust tests deterministic and offline.
    if let Some(disable) = config.disable_network {
        return disable;
    }
    std::env::var("PAWPAL_DISABLE_NETWORK").ok().as_deref() == Some("1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = load_app_config(&dir.path().to_string_lossy());
        assert_eq!(c.page_size(), 20);
        assert_eq!(c.subscription_mode(), SubscriptionMode::PerUser);
        assert_eq!(c.publish_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"page_size": 5, "subscription_mode": "per_conversation", "ws_url": "  "}"#,
        )
        .unwrap();
        let c = load_app_config(&dir.path().to_string_lossy());
        assert_eq!(c.page_size(), 5);
        assert_eq!(c.subscription_mode(), SubscriptionMode::PerConversation);
        assert_eq!(c.ws_url(), DEFAULT_WS_URL);
        assert_eq!(c.ack_stagger(), Duration::from_millis(150));
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        let c = load_app_config(&dir.path().to_string_lossy());
        assert!(c.disable_network.is_none());
    }

    #[test]
    fn default_json_round_trips() {
        let c: AppConfig = serde_json::from_str(&default_app_config_json()).unwrap();
        assert_eq!(c.disable_network, Some(false));
        assert_eq!(c.retry_policy().max_attempts, 5);
        assert_eq!(c.echo_match_window_ms(), 10_000);
    }
}
