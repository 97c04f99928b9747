//! STOMP 1.2 over WebSocket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{Credentials, Inbound, PublishAck, Transport};
use crate::error::{ConnectError, PublishError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("malformed header line `{0}`")]
    Header(String),
    #[error("missing NUL terminator")]
    Unterminated,
}

impl Frame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value wins when a header repeats.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> String {
        // CONNECT/CONNECTED headers are not escaped.
        let escape = !matches!(self.command.as_str(), "CONNECT" | "CONNECTED");
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        if !self.body.is_empty() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame. `Ok(None)` for a heart-beat (bare EOLs).
    pub fn parse(raw: &str) -> Result<Option<Self>, FrameError> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        if raw.is_empty() {
            return Ok(None);
        }
        let (head, rest) = match raw.find("\n\n") {
            Some(i) => (&raw[..i], &raw[i + 2..]),
            None => match raw.find("\r\n\r\n") {
                Some(i) => (&raw[..i], &raw[i + 4..]),
                None => return Err(FrameError::Unterminated),
            },
        };
        let mut lines = head.lines();
        let command = lines
            .next()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .ok_or(FrameError::Empty)?
            .to_string();
        let unescape = command != "CONNECTED";
        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let (k, v) = line
                .split_once(':')
                .ok_or_else(|| FrameError::Header(line.to_string()))?;
            if unescape {
                headers.push((unescape_header(k), unescape_header(v)));
            } else {
                headers.push((k.to_string(), v.to_string()));
            }
        }
        let body = match rest.find('\0') {
            Some(end) => rest[..end].to_string(),
            None => return Err(FrameError::Unterminated),
        };
        Ok(Some(Self {
            command,
            headers,
            body,
        }))
    }
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

type ReceiptTx = oneshot::Sender<Result<PublishAck, PublishError>>;

#[derive(Default)]
struct Shared {
    // subscription id -> topic
    subscriptions: HashMap<String, String>,
    receipts: HashMap<String, ReceiptTx>,
}

struct Connection {
    out_tx: mpsc::UnboundedSender<String>,
    shared: Arc<Mutex<Shared>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub struct StompTransport {
    url: String,
    next_id: AtomicU64,
    conn: Mutex<Option<Connection>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

impl StompTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            next_id: AtomicU64::new(1),
            conn: Mutex::new(None),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn send_frame(&self, frame: &Frame) -> Result<Arc<Mutex<Shared>>, PublishError> {
        let guard = lock(&self.conn);
        let conn = guard.as_ref().ok_or(PublishError::NotConnected)?;
        conn.out_tx
            .send(frame.encode())
            .map_err(|_| PublishError::Network("connection closed".into()))?;
        Ok(conn.shared.clone())
    }

    fn teardown(&self) {
        if let Some(conn) = lock(&self.conn).take() {
            conn.reader.abort();
            conn.writer.abort();
            fail_receipts(&conn.shared, "connection closed");
        }
    }
}

fn fail_receipts(shared: &Arc<Mutex<Shared>>, reason: &str) {
    let pending: Vec<ReceiptTx> = lock(shared).receipts.drain().map(|(_, tx)| tx).collect();
    for tx in pending {
        let _ = tx.send(Err(PublishError::Network(reason.to_string())));
    }
}

#[async_trait]
impl Transport for StompTransport {
    async fn open(
        &self,
        credentials: &Credentials,
        inbound: flume::Sender<Inbound>,
    ) -> Result<(), ConnectError> {
        self.teardown();

        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ConnectError::Network(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let host = url_host(&self.url);
        let connect = Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("login", credentials.user_id.clone())
            .header("passcode", credentials.token.clone())
            .header("Authorization", format!("Bearer {}", credentials.token))
            .header("heart-beat", "0,0");
        sink.send(WsMessage::Text(connect.encode().into()))
            .await
            .map_err(|e| ConnectError::Network(e.to_string()))?;

        let handshake = async {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(WsMessage::Text(t)) => t.to_string(),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(ConnectError::Network(e.to_string())),
                };
                match Frame::parse(&text) {
                    Ok(Some(f)) if f.command == "CONNECTED" => return Ok(()),
                    Ok(Some(f)) if f.command == "ERROR" => {
                        let reason = f.get("message").unwrap_or("rejected").to_string();
                        return Err(ConnectError::Auth(reason));
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(ConnectError::Network(e.to_string())),
                }
            }
            Err(ConnectError::Network("closed during handshake".into()))
        };
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectError::Network("handshake timed out".into())),
        }

        let shared = Arc::new(Mutex::new(Shared::default()));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let shared_for_reader = shared.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                let text = match stream.next().await {
                    Some(Ok(WsMessage::Text(t))) => t.to_string(),
                    Some(Ok(WsMessage::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by server".into());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                };
                let frame = match Frame::parse(&text) {
                    Ok(Some(f)) => f,
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::warn!(%err, "dropping malformed stomp frame");
                        continue;
                    }
                };
                match frame.command.as_str() {
                    "MESSAGE" => {
                        let topic = {
                            let sh = lock(&shared_for_reader);
                            frame
                                .get("subscription")
                                .and_then(|id| sh.subscriptions.get(id).cloned())
                        }
                        .or_else(|| frame.get("destination").map(ToString::to_string));
                        let Some(topic) = topic else {
                            continue;
                        };
                        if inbound
                            .send(Inbound::Frame {
                                topic,
                                body: frame.body,
                            })
                            .is_err()
                        {
                            break "receiver dropped".to_string();
                        }
                    }
                    "RECEIPT" => {
                        if let Some(id) = frame.get("receipt-id") {
                            let tx = lock(&shared_for_reader).receipts.remove(id);
                            if let Some(tx) = tx {
                                let body = (!frame.body.is_empty()).then(|| frame.body.clone());
                                let _ = tx.send(Ok(PublishAck { body }));
                            }
                        }
                    }
                    "ERROR" => {
                        let message = frame.get("message").unwrap_or("error").to_string();
                        let tx = frame
                            .get("receipt-id")
                            .and_then(|id| lock(&shared_for_reader).receipts.remove(id));
                        match tx {
                            Some(tx) => {
                                let _ = tx.send(Err(PublishError::Rejected(message)));
                            }
                            // The server closes the connection after an unscoped ERROR.
                            None => break message,
                        }
                    }
                    other => tracing::debug!(command = other, "ignoring stomp frame"),
                }
            };
            fail_receipts(&shared_for_reader, &reason);
            let _ = inbound.send(Inbound::Closed { reason });
        });

        *lock(&self.conn) = Some(Connection {
            out_tx,
            shared,
            reader,
            writer,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), PublishError> {
        let id = self.next_id("sub");
        let frame = Frame::new("SUBSCRIBE")
            .header("id", id.clone())
            .header("destination", topic)
            .header("ack", "auto");
        let shared = self.send_frame(&frame)?;
        lock(&shared).subscriptions.insert(id, topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), PublishError> {
        let shared = {
            let guard = lock(&self.conn);
            let conn = guard.as_ref().ok_or(PublishError::NotConnected)?;
            conn.shared.clone()
        };
        let id = {
            let mut sh = lock(&shared);
            let id = sh
                .subscriptions
                .iter()
                .find(|(_, t)| t.as_str() == topic)
                .map(|(id, _)| id.clone());
            if let Some(id) = &id {
                sh.subscriptions.remove(id);
            }
            id
        };
        let Some(id) = id else {
            return Ok(());
        };
        self.send_frame(&Frame::new("UNSUBSCRIBE").header("id", id))?;
        Ok(())
    }

    async fn publish(&self, destination: &str, body: &str) -> Result<PublishAck, PublishError> {
        let receipt = self.next_id("rcpt");
        let frame = Frame::new("SEND")
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("receipt", receipt.clone())
            .with_body(body);

        let (tx, rx) = oneshot::channel();
        {
            let guard = lock(&self.conn);
            let conn = guard.as_ref().ok_or(PublishError::NotConnected)?;
            lock(&conn.shared).receipts.insert(receipt.clone(), tx);
            if conn.out_tx.send(frame.encode()).is_err() {
                lock(&conn.shared).receipts.remove(&receipt);
                return Err(PublishError::Network("connection closed".into()));
            }
        }
        rx.await
            .unwrap_or_else(|_| Err(PublishError::Network("connection closed".into())))
    }

    async fn close(&self) {
        let _ = self.send_frame(&Frame::new("DISCONNECT"));
        // Give the writer a moment to flush DISCONNECT.
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.teardown();
    }
}

fn url_host(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    without_scheme
        .split(['/', ':'])
        .next()
        .unwrap_or_default()
        .to_string()
}
