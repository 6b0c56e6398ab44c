/*!
 * # Message Queue
 *
 * Fire-and-forget job queue used for notification and invoice work that
 * follows a settled payment. Enqueue happens only after the state-mutating
 * transaction has committed; delivery is at-least-once on the consumer side
 * and never guaranteed by this core.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Topic for invoice-document generation jobs.
pub const TOPIC_INVOICE_GENERATE: &str = "invoices.generate";
/// Topic for order-confirmation notification jobs.
pub const TOPIC_ORDER_CONFIRMED: &str = "notifications.order_confirmed";

/// Message queue errors
#[derive(Error, Debug)]
pub enum MessageQueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Message envelope for queue items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Message queue trait for different implementations
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError>;
    async fn consume(&self, topic: &str) -> Result<Option<Message>, MessageQueueError>;
}

/// In-memory message queue implementation
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    queues: Mutex<HashMap<String, VecDeque<Message>>>,
    max_size: usize,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_max_size(1000)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            max_size,
        }
    }

    /// Number of queued messages for a topic. Test helper.
    pub fn depth(&self, topic: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(topic)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError> {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(message.topic.clone()).or_default();

        if queue.len() >= self.max_size {
            return Err(MessageQueueError::QueueFull);
        }

        queue.push_back(message);
        Ok(())
    }

    async fn consume(&self, topic: &str) -> Result<Option<Message>, MessageQueueError> {
        let mut queues = self.queues.lock().unwrap();
        Ok(queues.get_mut(topic).and_then(|q| q.pop_front()))
    }
}

/// A queue that rejects every publish. Lets tests assert the settlement
/// decision is isolated from job-queue availability.
#[derive(Debug, Default)]
pub struct FailingMessageQueue;

#[async_trait]
impl MessageQueue for FailingMessageQueue {
    async fn publish(&self, _message: Message) -> Result<(), MessageQueueError> {
        Err(MessageQueueError::ConnectionError(
            "queue backend offline".to_string(),
        ))
    }

    async fn consume(&self, _topic: &str) -> Result<Option<Message>, MessageQueueError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_and_consume_in_order() {
        let queue = InMemoryMessageQueue::new();
        queue
            .publish(Message::new(TOPIC_INVOICE_GENERATE, json!({"order": 1})))
            .await
            .unwrap();
        queue
            .publish(Message::new(TOPIC_INVOICE_GENERATE, json!({"order": 2})))
            .await
            .unwrap();

        let first = queue.consume(TOPIC_INVOICE_GENERATE).await.unwrap().unwrap();
        assert_eq!(first.payload["order"], 1);
        let second = queue.consume(TOPIC_INVOICE_GENERATE).await.unwrap().unwrap();
        assert_eq!(second.payload["order"], 2);
        assert!(queue.consume(TOPIC_INVOICE_GENERATE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bounded_queue_rejects_overflow() {
        let queue = InMemoryMessageQueue::with_max_size(1);
        queue
            .publish(Message::new(TOPIC_ORDER_CONFIRMED, json!({})))
            .await
            .unwrap();
        let err = queue
            .publish(Message::new(TOPIC_ORDER_CONFIRMED, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, MessageQueueError::QueueFull));
    }
}
