/// Fan-out of serialized status snapshots to live subscribers
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-subscriber queue depth; a subscriber that falls this far behind is dropped
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 10;

type SubscriberMap = Mutex<HashMap<Uuid, mpsc::Sender<String>>>;

pub struct StatusBroadcaster {
    subscribers: Arc<SubscriberMap>,
    capacity: usize,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        StatusBroadcaster {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber. Dropping the returned stream unsubscribes it.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        self.subscribers.lock().insert(id, tx);
        debug!("Subscriber {} connected", id);
        Subscription {
            id,
            rx,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver a message to every subscriber without blocking.
    /// Subscribers whose queue is full or whose receiver is gone are removed.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut dropped = Vec::new();

        for (id, tx) in subscribers.iter() {
            match tx.try_send(message.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not keeping up, dropping it", id);
                    dropped.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(*id),
            }
        }

        for id in &dropped {
            subscribers.remove(id);
        }
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Stream of messages for one subscriber
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<String>,
    subscribers: Weak<SubscriberMap>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl futures_util::Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().remove(&self.id);
            debug!("Subscriber {} disconnected", self.id);
        }
    }
}
