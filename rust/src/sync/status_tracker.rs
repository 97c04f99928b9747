// Delivery/read acknowledgements for inbound messages in the open conversation.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::PublishError;

use super::model::{Message, MessageStatus, SyncState};
use super::ChatContext;

/// One acknowledgement to publish after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRequest {
    pub conversation_id: String,
    pub message_id: String,
    pub status: MessageStatus,
    pub delay: Duration,
}

/// Decides which acknowledgements are owed and tracks the ones in flight.
///
/// The local status of a message is only advanced by the caller once the
/// publish for it succeeded. Failed acknowledgements are parked until
/// [`StatusTracker::retry_parked`] (reconnect, reopen) so they are not hammered
/// while the connection is down.
#[derive(Debug)]
pub struct StatusTracker {
    stagger: Duration,
    in_flight: HashSet<(String, MessageStatus)>,
    parked: HashSet<(String, MessageStatus)>,
}

impl StatusTracker {
    pub fn new(stagger: Duration) -> Self {
        Self {
            stagger,
            in_flight: HashSet::new(),
            parked: HashSet::new(),
        }
    }

    /// Acknowledgements owed for `messages`, staggered in list order.
    pub fn plan(&mut self, ctx: &ChatContext, messages: &[Message]) -> Vec<AckRequest> {
        let mut out = Vec::new();
        for m in messages {
            if !ctx.is_open(&m.conversation_id) || m.sender_id == ctx.local_user_id {
                continue;
            }
            if m.sync != SyncState::Confirmed {
                continue;
            }
            let (Some(id), Some(next)) = (m.id.as_deref(), m.status.next()) else {
                continue;
            };
            // One acknowledgement per message at a time: `read` waits for `delivered`.
            if self.in_flight.iter().any(|(mid, _)| mid == id) {
                continue;
            }
            let key = (id.to_string(), next);
            if self.parked.contains(&key) {
                continue;
            }
            self.in_flight.insert(key);
            let delay = self.stagger.saturating_mul(out.len() as u32);
            out.push(AckRequest {
                conversation_id: m.conversation_id.clone(),
                message_id: id.to_string(),
                status: next,
                delay,
            });
        }
        if !out.is_empty() {
            tracing::debug!(count = out.len(), "acknowledgements planned");
        }
        out
    }

    /// Whether a due request should still go out.
    pub fn is_due(&self, ctx: &ChatContext, req: &AckRequest) -> bool {
        ctx.is_open(&req.conversation_id)
            && self
                .in_flight
                .contains(&(req.message_id.clone(), req.status))
    }

    /// Drop a due request whose conversation is no longer open.
    pub fn cancel(&mut self, req: &AckRequest) {
        self.in_flight.remove(&(req.message_id.clone(), req.status));
    }

    /// Record the publish outcome. Returns `true` when the caller should now
    /// advance the local status.
    pub fn on_published(&mut self, req: &AckRequest, result: Result<(), &PublishError>) -> bool {
        let key = (req.message_id.clone(), req.status);
        if !self.in_flight.remove(&key) {
            return false;
        }
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    message_id = %req.message_id,
                    status = req.status.as_wire(),
                    %err,
                    "acknowledgement publish failed"
                );
                self.parked.insert(key);
                false
            }
        }
    }

    /// Make parked acknowledgements eligible again.
    pub fn retry_parked(&mut self) {
        self.parked.clear();
    }

    /// Forget everything (conversation closed or session ended).
    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.parked.clear();
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
