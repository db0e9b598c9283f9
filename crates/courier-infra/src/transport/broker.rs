//! Process-local queues and subscriptions shared by every endpoint that uses
//! the same broker.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use courier_types::error::TransportError;
use courier_types::message::IncomingMessage;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;

/// Canonical form of an in-memory address: trimmed and lower-cased.
pub fn canonical_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// A message waiting in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message: IncomingMessage,
    /// Dropped instead of delivered once this time has passed.
    pub discard_after: Option<DateTime<Utc>>,
}

impl QueuedMessage {
    pub fn new(message: IncomingMessage) -> Self {
        Self {
            message,
            discard_after: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.discard_after.is_some_and(|deadline| now > deadline)
    }
}

/// A FIFO queue with async receive.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    messages: Mutex<VecDeque<QueuedMessage>>,
    available: Notify,
}

impl InMemoryQueue {
    fn messages(&self) -> MutexGuard<'_, VecDeque<QueuedMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, message: QueuedMessage) {
        self.messages().push_back(message);
        self.available.notify_one();
    }

    /// Put a message back at the head of the queue after a failed receive.
    pub fn requeue(&self, message: QueuedMessage) {
        self.messages().push_front(message);
        self.available.notify_one();
    }

    pub fn try_pop(&self) -> Option<QueuedMessage> {
        self.messages().pop_front()
    }

    /// Wait for the next message.
    pub async fn receive(&self) -> QueuedMessage {
        loop {
            if let Some(message) = self.try_pop() {
                return message;
            }
            self.available.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.messages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages().is_empty()
    }

    /// Remove every waiting message, returning how many were dropped.
    pub fn purge(&self) -> usize {
        let mut messages = self.messages();
        let purged = messages.len();
        messages.clear();
        purged
    }

    fn drain(&self) -> Vec<QueuedMessage> {
        self.messages().drain(..).collect()
    }
}

/// Queues by canonical address and native subscriptions by message type.
///
/// Clones share state, so one broker connects every endpoint built on it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    queues: Arc<DashMap<String, Arc<InMemoryQueue>>>,
    subscriptions: Arc<DashMap<String, BTreeSet<String>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue; `false` if it already existed.
    pub fn create_queue(&self, address: &str) -> bool {
        let key = canonical_address(address);
        if self.queues.contains_key(&key) {
            return false;
        }
        self.queues.entry(key.clone()).or_default();
        debug!(queue = %key, "queue created");
        true
    }

    pub fn queue_exists(&self, address: &str) -> bool {
        self.queues.contains_key(&canonical_address(address))
    }

    pub fn queue(&self, address: &str) -> Option<Arc<InMemoryQueue>> {
        self.queues
            .get(&canonical_address(address))
            .map(|queue| Arc::clone(queue.value()))
    }

    pub(crate) fn existing_queue(&self, address: &str) -> Result<Arc<InMemoryQueue>, TransportError> {
        self.queue(address)
            .ok_or_else(|| TransportError::QueueNotFound(canonical_address(address)))
    }

    /// Number of messages waiting in a queue; zero for unknown queues.
    pub fn depth(&self, address: &str) -> usize {
        self.queue(address).map_or(0, |queue| queue.len())
    }

    /// Take every waiting message out of a queue, e.g. to inspect an error queue.
    pub fn take_messages(&self, address: &str) -> Vec<IncomingMessage> {
        self.queue(address)
            .map(|queue| queue.drain().into_iter().map(|queued| queued.message).collect())
            .unwrap_or_default()
    }

    pub fn subscribe(&self, message_type: &str, subscriber: &str) {
        self.subscriptions
            .entry(message_type.to_string())
            .or_default()
            .insert(canonical_address(subscriber));
    }

    pub fn unsubscribe(&self, message_type: &str, subscriber: &str) {
        if let Some(mut subscribers) = self.subscriptions.get_mut(message_type) {
            subscribers.remove(&canonical_address(subscriber));
        }
    }

    /// Subscriber addresses for a message type, in sorted order.
    pub fn subscribers(&self, message_type: &str) -> Vec<String> {
        self.subscriptions
            .get(message_type)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_types::message::Headers;

    use super::*;

    fn message(id: &str) -> QueuedMessage {
        QueuedMessage::new(IncomingMessage::new(id, Headers::new(), Vec::new()))
    }

    #[test]
    fn addresses_are_case_and_whitespace_insensitive() {
        let broker = InMemoryBroker::new();
        assert!(broker.create_queue(" Sales "));
        assert!(!broker.create_queue("sales"));
        assert!(broker.queue_exists("SALES"));
        assert_eq!(canonical_address(" Sales.Timeouts "), "sales.timeouts");
    }

    #[test]
    fn requeued_messages_are_received_first() {
        let queue = InMemoryQueue::default();
        queue.push(message("a"));
        queue.push(message("b"));

        let first = queue.try_pop().unwrap();
        queue.requeue(first);
        assert_eq!(queue.try_pop().unwrap().message.message_id, "a");
        assert_eq!(queue.try_pop().unwrap().message.message_id, "b");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn receive_waits_for_a_message() {
        let queue = Arc::new(InMemoryQueue::default());
        let receiver = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.receive().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(message("late"));

        let received = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.message.message_id, "late");
    }

    #[test]
    fn subscriptions_are_sorted_and_removable() {
        let broker = InMemoryBroker::new();
        broker.subscribe("sales.OrderPlaced", "Shipping");
        broker.subscribe("sales.OrderPlaced", "Billing");
        broker.subscribe("sales.OrderPlaced", "billing");
        assert_eq!(broker.subscribers("sales.OrderPlaced"), ["billing", "shipping"]);

        broker.unsubscribe("sales.OrderPlaced", "SHIPPING");
        assert_eq!(broker.subscribers("sales.OrderPlaced"), ["billing"]);
        assert!(broker.subscribers("sales.Unknown").is_empty());
    }

    #[test]
    fn expiry_is_checked_against_the_deadline() {
        let now = Utc::now();
        let mut queued = message("a");
        assert!(!queued.is_expired(now));
        queued.discard_after = Some(now - chrono::Duration::seconds(1));
        assert!(queued.is_expired(now));
    }
}
