//! Subscriber abstraction
//!
//! Topics push messages straight into [`Subscriber::send`] from their own
//! task. An implementation that blocks there stalls delivery to every other
//! subscriber of the same topic, so implementations must hand messages off
//! without waiting. [`QueueSubscriber`] does this with a bounded queue that
//! drops on overflow.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::msg::Msg;

/// Receiving end of topic deliveries
///
/// `send` is called synchronously from a topic task and must never block.
pub trait Subscriber: Send + Sync + 'static {
    /// Push one message
    fn send(&self, msg: Msg);

    /// Push a batch, in order
    fn send_batch(&self, msgs: &[Msg]) {
        for msg in msgs {
            self.send(msg.clone());
        }
    }

    /// Free-form metadata reported in topic stats
    fn meta(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Identity of a consumer across topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscriber together with its identity
///
/// Cloning is cheap; all clones refer to the same subscriber.
#[derive(Clone)]
pub struct Consumer {
    id: ConsumerId,
    sink: Arc<dyn Subscriber>,
}

impl Consumer {
    pub fn new(id: ConsumerId, sink: Arc<dyn Subscriber>) -> Self {
        Self { id, sink }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn send(&self, msg: Msg) {
        self.sink.send(msg);
    }

    pub fn send_batch(&self, msgs: &[Msg]) {
        self.sink.send_batch(msgs);
    }

    pub fn meta(&self) -> HashMap<String, String> {
        self.sink.meta()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Subscriber backed by a bounded queue
///
/// Never blocks: when the queue is full the message is dropped and counted.
/// The reading side is the `mpsc::Receiver` returned by [`QueueSubscriber::channel`].
pub struct QueueSubscriber {
    tx: mpsc::Sender<Msg>,
    dropped: AtomicU64,
    meta: HashMap<String, String>,
}

impl QueueSubscriber {
    /// Create a subscriber and the receiver draining it
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Msg>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscriber = Self {
            tx,
            dropped: AtomicU64::new(0),
            meta: HashMap::new(),
        };
        (subscriber, rx)
    }

    /// Attach a metadata entry reported in topic stats
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Number of messages dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Subscriber for QueueSubscriber {
    fn send(&self, msg: Msg) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    topic = %msg.topic,
                    ts = msg.ts,
                    dropped = dropped,
                    "Subscriber queue full, message dropped"
                );
            }
            Err(TrySendError::Closed(msg)) => {
                tracing::trace!(topic = %msg.topic, ts = msg.ts, "Subscriber queue closed");
            }
        }
    }

    fn meta(&self) -> HashMap<String, String> {
        self.meta.clone()
    }
}

#[cfg(test)]
pub(crate) use testing::recorder;
