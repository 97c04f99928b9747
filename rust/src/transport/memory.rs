//! In-process [`Transport`]. Backs offline mode and the test suites; tests
//! script the "server" side through the inherent methods.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{Credentials, Inbound, PublishAck, Transport};
use crate::error::{ConnectError, PublishError};

type ReceiptResponder = Arc<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub destination: String,
    pub body: String,
}

#[derive(Default)]
struct State {
    inbound: Option<flume::Sender<Inbound>>,
    user_id: Option<String>,
    topics: BTreeSet<String>,
    published: Vec<Published>,
    offline: bool,
    reject_auth: bool,
    failing_connects: u32,
    failing_publishes: u32,
    publish_delay: Option<Duration>,
    connect_attempts: u32,
    subscribe_calls: u32,
    responder: Option<ReceiptResponder>,
}

#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    /// While offline, connects and publishes fail with network errors.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn reject_auth(&self, reject: bool) {
        self.lock().reject_auth = reject;
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.lock().failing_connects = n;
    }

    /// The next `n` publishes are rejected by the "server".
    pub fn reject_next_publishes(&self, n: u32) {
        self.lock().failing_publishes = n;
    }

    pub fn set_publish_delay(&self, delay: Duration) {
        self.lock().publish_delay = Some(delay);
    }

    /// Compute a receipt body for each publish, e.g. the stored message for
    /// a send.
    pub fn set_receipt_responder(
        &self,
        f: impl Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    ) {
        self.lock().responder = Some(Arc::new(f));
    }

    pub fn is_open(&self) -> bool {
        self.lock().inbound.is_some()
    }

    pub fn user_id(&self) -> Option<String> {
        self.lock().user_id.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn subscribe_calls(&self) -> u32 {
        self.lock().subscribe_calls
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.lock().topics.iter().cloned().collect()
    }

    pub fn published(&self) -> Vec<Published> {
        self.lock().published.clone()
    }

    pub fn published_to(&self, destination: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|p| p.destination == destination)
            .map(|p| p.body.clone())
            .collect()
    }

    /// Deliver a server frame. Returns `false` when nobody is subscribed to
    /// `topic` (the frame is dropped, as a broker would).
    pub fn push(&self, topic: &str, body: impl Into<String>) -> bool {
        let st = self.lock();
        let Some(tx) = st.inbound.as_ref() else {
            return false;
        };
        if !st.topics.contains(topic) {
            return false;
        }
        tx.send(Inbound::Frame {
            topic: topic.to_string(),
            body: body.into(),
        })
        .is_ok()
    }

    /// Simulate the server going away.
    pub fn drop_connection(&self, reason: &str) {
        let mut st = self.lock();
        st.topics.clear();
        if let Some(tx) = st.inbound.take() {
            let _ = tx.send(Inbound::Closed {
                reason: reason.to_string(),
            });
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        credentials: &Credentials,
        inbound: flume::Sender<Inbound>,
    ) -> Result<(), ConnectError> {
        let mut st = self.lock();
        st.connect_attempts += 1;
        if st.reject_auth {
            return Err(ConnectError::Auth("invalid token".into()));
        }
        if st.offline {
            return Err(ConnectError::Network("offline".into()));
        }
        if st.failing_connects > 0 {
            st.failing_connects -= 1;
            return Err(ConnectError::Network("connection refused".into()));
        }
        st.topics.clear();
        st.user_id = Some(credentials.user_id.clone());
        st.inbound = Some(inbound);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), PublishError> {
        let mut st = self.lock();
        if st.inbound.is_none() {
            return Err(PublishError::NotConnected);
        }
        st.subscribe_calls += 1;
        st.topics.insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), PublishError> {
        self.lock().topics.remove(topic);
        Ok(())
    }

    async fn publish(&self, destination: &str, body: &str) -> Result<PublishAck, PublishError> {
        let delay = self.lock().publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let responder = {
            let mut st = self.lock();
            if st.offline {
                return Err(PublishError::Network("offline".into()));
            }
            if st.inbound.is_none() {
                return Err(PublishError::NotConnected);
            }
            if st.failing_publishes > 0 {
                st.failing_publishes -= 1;
                return Err(PublishError::Rejected("rejected by test server".into()));
            }
            st.published.push(Published {
                destination: destination.to_string(),
                body: body.to_string(),
            });
            st.responder.clone()
        };
        Ok(PublishAck {
            body: responder.and_then(|f| f(destination, body)),
        })
    }

    async fn close(&self) {
        let mut st = self.lock();
        st.inbound = None;
        st.topics.clear();
    }
}
