//! In-process event dispatch fabric.
//!
//! One bounded queue of (topic, event) pairs and one dispatch task that drains
//! it strictly in arrival order, invoking every subscriber of the topic
//! sequentially. Handler failures and panics are isolated per message: they
//! are logged and the loop moves on.

use crate::domain::VenueEvent;
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Logical topic a message is published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    MarketData,
    Portfolio,
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::MarketData => write!(f, "market_data"),
            Topic::Portfolio => write!(f, "portfolio"),
        }
    }
}

/// What `publish` does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Await capacity. Producers see a full queue as backpressure.
    #[default]
    Block,
    /// Drop the message and log. Only for topics where the next message
    /// supersedes the lost one (raw price ticks).
    DropWithLog,
}

/// A subscriber invoked for every message on its topic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in dispatch logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &VenueEvent) -> Result<()>;
}

enum BusMessage {
    Event(Topic, VenueEvent),
    /// Poison message injected by `stop`; drains the queue up to this point.
    Shutdown,
}

type SubscriberMap = HashMap<Topic, Vec<Arc<dyn EventHandler>>>;

/// Bounded single-queue event bus with topic-keyed subscriber lists.
pub struct EventBus {
    tx: mpsc::Sender<BusMessage>,
    rx: Mutex<Option<mpsc::Receiver<BusMessage>>>,
    subscribers: Arc<RwLock<SubscriberMap>>,
    policies: HashMap<Topic, QueuePolicy>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus with the given queue capacity. Every topic defaults to
    /// the blocking policy; override per topic with [`EventBus::with_policy`].
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        EventBus {
            tx,
            rx: Mutex::new(Some(rx)),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            policies: HashMap::new(),
            dispatch_task: Mutex::new(None),
        }
    }

    /// Declare the full-queue policy for a topic.
    pub fn with_policy(mut self, topic: Topic, policy: QueuePolicy) -> Self {
        self.policies.insert(topic, policy);
        self
    }

    /// Register a handler for every future message on `topic`.
    ///
    /// Handlers run sequentially inside the dispatch loop; a slow handler
    /// delays all topics, so long work must be handed off internally.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.entry(topic).or_default().push(handler);
    }

    /// Enqueue an event under `topic`, honoring the topic's queue policy.
    pub async fn publish(&self, topic: Topic, event: VenueEvent) {
        match self.policies.get(&topic).copied().unwrap_or_default() {
            QueuePolicy::Block => {
                if self.tx.send(BusMessage::Event(topic, event)).await.is_err() {
                    warn!(%topic, "bus queue closed, message dropped");
                }
            }
            QueuePolicy::DropWithLog => {
                if let Err(err) = self.tx.try_send(BusMessage::Event(topic, event)) {
                    match err {
                        mpsc::error::TrySendError::Full(_) => {
                            warn!(%topic, "bus queue full, message dropped")
                        }
                        mpsc::error::TrySendError::Closed(_) => {
                            warn!(%topic, "bus queue closed, message dropped")
                        }
                    }
                }
            }
        }
    }

    /// Start the dispatch loop. Idempotent: a second call is a no-op.
    pub fn start(&self) {
        let mut task = self
            .dispatch_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.is_some() {
            return;
        }
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(rx) = rx else {
            // Already consumed by a previous start/stop cycle.
            return;
        };
        let subscribers = Arc::clone(&self.subscribers);
        *task = Some(tokio::spawn(dispatch_loop(rx, subscribers)));
    }

    /// Stop the dispatch loop after draining everything already queued.
    /// Idempotent.
    pub async fn stop(&self) {
        let task = {
            let mut guard = self
                .dispatch_task
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take()
        };
        let Some(task) = task else { return };
        if self.tx.send(BusMessage::Shutdown).await.is_err() {
            task.abort();
            return;
        }
        if let Err(err) = task.await {
            error!(error = %err, "bus dispatch task terminated abnormally");
        }
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<BusMessage>,
    subscribers: Arc<RwLock<SubscriberMap>>,
) {
    debug!("bus dispatch loop started");
    while let Some(message) = rx.recv().await {
        let (topic, event) = match message {
            BusMessage::Event(topic, event) => (topic, event),
            BusMessage::Shutdown => break,
        };

        // Snapshot the subscriber list so the lock is not held across awaits.
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subs = subscribers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subs.get(&topic).cloned().unwrap_or_default()
        };

        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(&event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(%topic, handler = handler.name(), error = %err, "handler failed");
                }
                Err(_panic) => {
                    error!(%topic, handler = handler.name(), "handler panicked");
                }
            }
        }
    }
    debug!("bus dispatch loop stopped");
}
