//! Exam-scoped publish/subscribe hub.
//!
//! Every exam gets its own broadcast topic. Delivery is best effort: events
//! published while nobody listens are dropped, and a subscriber that falls
//! more than `capacity` events behind skips the overflow.

use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::signal::SignalEnvelope;

const MIN_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct SignalingService {
    topics: Arc<RwLock<HashMap<Uuid, broadcast::Sender<SignalEnvelope>>>>,
    capacity: usize,
}

impl SignalingService {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(MIN_CAPACITY),
        }
    }

    /// Fire-and-forget. Returns how many subscribers the event reached.
    pub fn publish(&self, envelope: SignalEnvelope) -> usize {
        let sender = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&envelope.exam_id)
            .cloned();
        match sender {
            Some(tx) => {
                let event = envelope.event.name();
                let delivered = tx.send(envelope).unwrap_or(0);
                debug!(event, delivered, "Published signal");
                delivered
            }
            None => {
                debug!(exam_id = %envelope.exam_id, event = envelope.event.name(), "No subscribers for exam topic");
                0
            }
        }
    }

    pub fn subscribe(&self, exam_id: Uuid) -> broadcast::Receiver<SignalEnvelope> {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(exam_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscription as a stream; lagged segments are logged and skipped.
    pub fn subscribe_stream(&self, exam_id: Uuid) -> BoxStream<'static, SignalEnvelope> {
        into_stream(self.subscribe(exam_id))
    }

    pub fn subscriber_count(&self, exam_id: Uuid) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&exam_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drops topics nobody listens to. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let before = topics.len();
        topics.retain(|_, tx| tx.receiver_count() > 0);
        before - topics.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub fn into_stream(rx: broadcast::Receiver<SignalEnvelope>) -> BoxStream<'static, SignalEnvelope> {
    BroadcastStream::new(rx)
        .filter_map(|item| async move {
            match item {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    warn!("Signal subscriber lagged: {}", e);
                    None
                }
            }
        })
        .boxed()
}
