//! The live pub/sub connection.
//!
//! [`Transport`] is the wire client (STOMP over WebSocket in production, an
//! in-memory double in tests and offline mode). [`ConnectionManager`] wraps it
//! with the lifecycle the app needs: bounded reconnect with backoff, shared
//! ref-counted topic subscriptions, and publish timeouts.

pub mod memory;
pub mod stomp;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{ConnectError, PublishError};

#[derive(Clone)]
pub struct Credentials {
    pub user_id: String,
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the token.
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Everything the transport delivers, in arrival order, on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame { topic: String, body: String },
    Closed { reason: String },
}

/// Server acknowledgement of a publish. `body` is the receipt payload when
/// the server attaches one (e.g. the stored message for a send).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishAck {
    pub body: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the connection. Inbound frames and the eventual close go to `inbound`.
    async fn open(
        &self,
        credentials: &Credentials,
        inbound: flume::Sender<Inbound>,
    ) -> Result<(), ConnectError>;

    async fn subscribe(&self, topic: &str) -> Result<(), PublishError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), PublishError>;

    async fn publish(&self, destination: &str, body: &str) -> Result<PublishAck, PublishError>;

    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): exponential, capped,
    /// plus up to half a base delay of jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay);
        let jitter_ms = (self.base_delay.as_millis() / 2) as u64;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Held by whoever asked for a topic. Give it back to
/// [`ConnectionManager::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: String,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    publish_timeout: Duration,
    connected: AtomicBool,
    // topic -> holders. The wire subscription exists while the count is > 0.
    subscriptions: Mutex<HashMap<String, usize>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, publish_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                publish_timeout,
                connected: AtomicBool::new(false),
                subscriptions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Connect, retrying network failures with backoff. Auth failures are
    /// returned immediately.
    pub async fn connect(
        &self,
        credentials: &Credentials,
        inbound: flume::Sender<Inbound>,
    ) -> Result<(), ConnectError> {
        let max = self.inner.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .inner
                .transport
                .open(credentials, inbound.clone())
                .await
            {
                Ok(()) => {
                    self.clear_subscriptions();
                    self.inner.connected.store(true, Ordering::SeqCst);
                    tracing::info!(attempt, user_id = %credentials.user_id, "live connection open");
                    return Ok(());
                }
                Err(err) if !err.is_retryable() => {
                    tracing::warn!(%err, "connect rejected");
                    return Err(err);
                }
                Err(err) if attempt >= max => {
                    tracing::warn!(attempt, %err, "connect attempts exhausted");
                    return Err(ConnectError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.inner.policy.backoff(attempt);
                    tracing::debug!(attempt, ?delay, %err, "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// The transport reported the connection gone. Subscriptions do not
    /// survive; owners re-subscribe after the next successful connect.
    pub fn connection_lost(&self) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("live connection lost");
        }
        self.clear_subscriptions();
    }

    pub async fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.clear_subscriptions();
        self.inner.transport.close().await;
    }

    pub async fn subscribe(&self, topic: &str) -> Result<SubscriptionHandle, PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        let first = {
            let mut subs = self.lock_subscriptions();
            let count = subs.entry(topic.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            if let Err(err) = self.inner.transport.subscribe(topic).await {
                self.release(topic);
                return Err(err);
            }
            tracing::debug!(%topic, "subscribed");
        }
        Ok(SubscriptionHandle {
            topic: topic.to_string(),
        })
    }

    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        if !self.release(&handle.topic) || !self.is_connected() {
            return;
        }
        if let Err(err) = self.inner.transport.unsubscribe(&handle.topic).await {
            tracing::debug!(topic = %handle.topic, %err, "unsubscribe failed");
        } else {
            tracing::debug!(topic = %handle.topic, "unsubscribed");
        }
    }

    pub async fn publish(&self, destination: &str, body: &str) -> Result<PublishAck, PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        let timeout = self.inner.publish_timeout;
        match tokio::time::timeout(timeout, self.inner.transport.publish(destination, body)).await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(timeout.as_millis() as u64)),
        }
    }

    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock_subscriptions().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Drop one holder. Returns `true` when it was the last one.
    fn release(&self, topic: &str) -> bool {
        let mut subs = self.lock_subscriptions();
        match subs.get_mut(topic) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                subs.remove(topic);
                true
            }
            None => false,
        }
    }

    fn clear_subscriptions(&self) {
        self.lock_subscriptions().clear();
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        match self.inner.subscriptions.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}
