//! Failure taxonomy for the chat sync core.
//!
//! Transport and history failures never cross the reconciliation boundary as
//! errors: the stores record them on the affected message or view instead.
//! A reference to a message that is not loaded locally is not an error at all
//! (see [`crate::sync::MergeOutcome::Missing`]).

/// Connecting (or reconnecting) the live connection failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The backend rejected the credential. Not retried.
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// The connection could not be established or dropped during handshake.
    #[error("network error: {0}")]
    Network(String),
    /// Every retry attempt failed.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ConnectError>,
    },
}

impl ConnectError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// A publish (send/edit/delete/status/reaction) did not reach the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("not connected")]
    NotConnected,
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("no receipt within {0} ms")]
    Timeout(u64),
}

/// A history page or chat list fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for LoadError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::Status(status.as_u16());
        }
        if e.is_decode() {
            return Self::Parse(e.to_string());
        }
        Self::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_display_includes_last_cause() {
        let err = ConnectError::Exhausted {
            attempts: 5,
            last: Box::new(ConnectError::Network("connection refused".into())),
        };
        assert_eq!(
            err.to_string(),
            "gave up after 5 attempts: network error: connection refused"
        );
    }

    #[test]
    fn only_network_connect_errors_are_retryable() {
        assert!(ConnectError::Network("reset".into()).is_retryable());
        assert!(!ConnectError::Auth("bad token".into()).is_retryable());
        let exhausted = ConnectError::Exhausted {
            attempts: 1,
            last: Box::new(ConnectError::Network("x".into())),
        };
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn publish_timeout_display() {
        assert_eq!(
            PublishError::Timeout(10_000).to_string(),
            "no receipt within 10000 ms"
        );
    }
}
