//! Pending-request registry.
//!
//! Requests waiting for a reply are indexed by correlation id, with a FIFO per
//! remote topic as a secondary index for peers that answer without an id.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::TransportError;
use crate::message::MessageId;
use crate::packet::ResponsePacket;

pub(crate) type ReplySender = oneshot::Sender<Result<ResponsePacket, TransportError>>;

/// One waiter.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) id: MessageId,
    pub(crate) topic: String,
    ticket: u64,
    sender: ReplySender,
    registered_at: Instant,
}

impl PendingRequest {
    /// Deliver the outcome; a waiter that already gave up is ignored.
    pub(crate) fn complete(self, result: Result<ResponsePacket, TransportError>) {
        tracing::trace!(
            id = %self.id,
            topic = %self.topic,
            elapsed = ?self.registered_at.elapsed(),
            ok = result.is_ok(),
            "completing pending request"
        );
        let _ = self.sender.send(result);
    }
}

#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    by_id: HashMap<MessageId, PendingRequest>,
    by_topic: HashMap<String, VecDeque<MessageId>>,
    next_ticket: u64,
}

impl PendingRequests {
    /// Register a waiter and return its ticket for [`PendingRequests::release`].
    ///
    /// An id that is already registered is rejected; the existing waiter is
    /// left alone.
    pub(crate) fn insert(
        &mut self,
        id: MessageId,
        topic: String,
        sender: ReplySender,
    ) -> Result<u64, TransportError> {
        if self.by_id.contains_key(&id) {
            return Err(TransportError::DuplicateId { id });
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.by_topic
            .entry(topic.clone())
            .or_default()
            .push_back(id.clone());
        self.by_id.insert(
            id.clone(),
            PendingRequest {
                id,
                topic,
                ticket,
                sender,
                registered_at: Instant::now(),
            },
        );
        Ok(ticket)
    }

    pub(crate) fn contains(&self, id: &MessageId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Remove the waiter for `id` only if it is still the registration
    /// identified by `ticket`.
    pub(crate) fn release(&mut self, id: &MessageId, ticket: u64) -> Option<PendingRequest> {
        if self.by_id.get(id)?.ticket != ticket {
            return None;
        }
        self.take(id)
    }

    pub(crate) fn take(&mut self, id: &MessageId) -> Option<PendingRequest> {
        let pending = self.by_id.remove(id)?;
        if let Some(queue) = self.by_topic.get_mut(&pending.topic) {
            queue.retain(|queued| queued != id);
            if queue.is_empty() {
                self.by_topic.remove(&pending.topic);
            }
        }
        Some(pending)
    }

    pub(crate) fn take_oldest_for(&mut self, topic: &str) -> Option<PendingRequest> {
        let id = self.by_topic.get(topic)?.front()?.clone();
        self.take(&id)
    }

    /// Waiter a reply belongs to: by id when the reply carries one, otherwise
    /// the oldest request sent to `topic`.
    pub(crate) fn take_match(
        &mut self,
        id: Option<&MessageId>,
        topic: Option<&str>,
    ) -> Option<PendingRequest> {
        match (id, topic) {
            (Some(id), _) => self.take(id),
            (None, Some(topic)) => self.take_oldest_for(topic),
            (None, None) => None,
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        self.by_topic.clear();
        self.by_id.drain().map(|(_, pending)| pending).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(
        registry: &mut PendingRequests,
        id: u64,
        topic: &str,
    ) -> oneshot::Receiver<Result<ResponsePacket, TransportError>> {
        let (tx, rx) = oneshot::channel();
        registry
            .insert(MessageId::Num(id), topic.to_string(), tx)
            .expect("fresh id");
        rx
    }

    #[test]
    fn test_take_by_id_clears_topic_index() {
        let mut registry = PendingRequests::default();
        let _rx = register(&mut registry, 1, "a:1");
        assert!(registry.take(&MessageId::Num(1)).is_some());
        assert_eq!(registry.len(), 0);
        assert!(registry.take_oldest_for("a:1").is_none());
    }

    #[test]
    fn test_fifo_fallback_per_topic() {
        let mut registry = PendingRequests::default();
        let _r1 = register(&mut registry, 1, "a:1");
        let _r2 = register(&mut registry, 2, "b:2");
        let _r3 = register(&mut registry, 3, "a:1");

        let first = registry.take_match(None, Some("a:1")).expect("oldest");
        assert_eq!(first.id, MessageId::Num(1));
        let second = registry.take_match(None, Some("a:1")).expect("next");
        assert_eq!(second.id, MessageId::Num(3));
        assert!(registry.take_match(None, Some("a:1")).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_id_does_not_fall_back() {
        let mut registry = PendingRequests::default();
        let _rx = register(&mut registry, 1, "a:1");
        assert!(registry
            .take_match(Some(&MessageId::Num(99)), Some("a:1"))
            .is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_keeps_first_waiter() {
        let mut registry = PendingRequests::default();
        let first = register(&mut registry, 1, "a:1");

        let (tx, _rx) = oneshot::channel();
        let err = registry
            .insert(MessageId::Num(1), "b:2".to_string(), tx)
            .expect_err("duplicate");
        assert!(matches!(err, TransportError::DuplicateId { id: MessageId::Num(1) }));
        assert_eq!(registry.len(), 1);
        assert!(registry.take_oldest_for("b:2").is_none());

        registry
            .take(&MessageId::Num(1))
            .expect("still registered")
            .complete(Ok(ResponsePacket::ok("first")));
        let reply = first.await.expect("completed").expect("ok");
        assert_eq!(reply.status, crate::packet::StatusCode::OK);
    }

    #[test]
    fn test_release_ignores_newer_registration() {
        let mut registry = PendingRequests::default();
        let (tx, _old) = oneshot::channel();
        let old_ticket = registry
            .insert(MessageId::Num(4), "a:1".to_string(), tx)
            .expect("insert");
        registry.take(&MessageId::Num(4)).expect("answered");

        let _new = register(&mut registry, 4, "a:1");
        assert!(registry.release(&MessageId::Num(4), old_ticket).is_none());
        assert!(registry.contains(&MessageId::Num(4)));
    }

    #[tokio::test]
    async fn test_drain_completes_waiters() {
        let mut registry = PendingRequests::default();
        let rx = register(&mut registry, 1, "a:1");
        for pending in registry.drain() {
            pending.complete(Err(TransportError::SessionClosed));
        }
        assert_eq!(registry.len(), 0);
        let outcome = rx.await.expect("completed");
        assert!(matches!(outcome, Err(TransportError::SessionClosed)));
    }
}
