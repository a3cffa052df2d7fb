//! In-memory event bus recording every published message.

use async_trait::async_trait;
use dicesim_env::{EnvError, EventBus, LifecycleEvent, TopicHandler, TopicResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A message accepted by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub data: Vec<u8>,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Topic bus delivering each message to every subscriber of its topic.
///
/// Delivery happens on spawned tasks, so `publish` never waits for a
/// subscriber. Every accepted message is kept in a log for inspection.
pub struct MemoryBus {
    subscribers: Mutex<HashMap<String, Vec<Arc<dyn TopicHandler>>>>,
    log: Mutex<Vec<PublishedMessage>>,
    notify: Notify,
    reject_publishes: AtomicBool,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            notify: Notify::new(),
            reject_publishes: AtomicBool::new(false),
            delivered: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates an Arc-wrapped bus for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Registers `handler` for messages on `topic`.
    pub fn subscribe(&self, topic: impl Into<String>, handler: Arc<dyn TopicHandler>) {
        self.subscribers
            .lock()
            .unwrap()
            .entry(topic.into())
            .or_default()
            .push(handler);
    }

    /// Number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Makes every following publish fail (or succeed again).
    pub fn reject_publishes(&self, reject: bool) {
        self.reject_publishes.store(reject, Ordering::SeqCst);
    }

    /// All messages accepted so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.log.lock().unwrap().clone()
    }

    /// Lifecycle events accepted on `topic`, skipping undecodable ones.
    pub fn published_events(&self, topic: &str) -> Vec<LifecycleEvent> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .filter_map(|msg| LifecycleEvent::from_bytes(&msg.data).ok())
            .collect()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.log.lock().unwrap().len() as u64,
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Waits until `predicate` holds for the message log.
    ///
    /// Returns false if `timeout` passes first.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&[PublishedMessage]) -> bool,
    ) -> bool {
        let wait = async {
            loop {
                let mut notified = std::pin::pin!(self.notify.notified());
                notified.as_mut().enable();
                if predicate(&self.log.lock().unwrap()) {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), EnvError> {
        if self.reject_publishes.load(Ordering::SeqCst) {
            return Err(EnvError::publish(topic, "bus rejected publish"));
        }

        let handlers = self
            .subscribers
            .lock()
            .unwrap()
            .get(topic)
            .cloned()
            .unwrap_or_default();

        self.log.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            data: data.clone(),
        });
        self.notify.notify_waiters();

        for handler in handlers {
            let topic = topic.to_string();
            let data = data.clone();
            let delivered = Arc::clone(&self.delivered);
            let dropped = Arc::clone(&self.dropped);
            tokio::spawn(async move {
                match handler.on_event(&topic, &data).await {
                    TopicResponse::Drop => dropped.fetch_add(1, Ordering::Relaxed),
                    _ => delivered.fetch_add(1, Ordering::Relaxed),
                };
            });
        }
        Ok(())
    }
}
