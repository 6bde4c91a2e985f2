//! Broker implementation
//!
//! The broker task owns the topic map and every consumer's subscription set.
//! Publishes and subscription changes go through one mailbox, so a subscribe
//! issued after a publish always observes it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{BrokerConfig, MIN_EXPIRY_CHECK_INTERVAL};
use crate::error::{BrokerError, Result};
use crate::msg::Msg;
use crate::stats::{BrokerStats, TopicStats};
use crate::topic::{Consumer, ConsumerId, Spreader, Subscriber};

/// Called with a topic name when a topic is created without its full state
pub type CurrentHook = Arc<dyn Fn(String) + Send + Sync>;

/// Requests handled by the broker task
enum Signal {
    Publish(Msg),
    Subscribe {
        consumer: Consumer,
        topics: HashMap<String, i64>,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        id: ConsumerId,
        reply: oneshot::Sender<()>,
    },
    Replay {
        topic: String,
        reply: oneshot::Sender<Vec<Msg>>,
    },
    Stats {
        reply: oneshot::Sender<BrokerStats>,
    },
    TopicStats {
        reply: oneshot::Sender<Vec<TopicStats>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Routes published messages to topics and manages subscriptions
///
/// All state lives in a single tokio task. The handle can be shared behind an
/// `Arc`; every method only sends a request to that task.
pub struct Broker {
    mailbox: mpsc::Sender<Signal>,
    closed: watch::Receiver<bool>,
    next_consumer_id: AtomicU64,
}

impl Broker {
    /// Spawn a broker on the current tokio runtime
    pub fn new(config: BrokerConfig) -> Self {
        Self::spawn(config, None)
    }

    /// Spawn a broker that asks for a topic's current state through `hook`
    ///
    /// The hook runs on its own tokio task whenever a topic is created by a
    /// subscribe or by a publish that is not a full state.
    pub fn with_current_hook<F>(config: BrokerConfig, hook: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Self::spawn(config, Some(Arc::new(hook)))
    }

    fn spawn(config: BrokerConfig, current: Option<CurrentHook>) -> Self {
        let (mailbox, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let (closed_tx, closed) = watch::channel(false);
        let state = BrokerState::new(config, current);
        tokio::spawn(run(state, rx, closed_tx));

        Self {
            mailbox,
            closed,
            next_consumer_id: AtomicU64::new(1),
        }
    }

    /// Wrap a subscriber with a fresh consumer id
    pub fn consumer(&self, sink: Arc<dyn Subscriber>) -> Consumer {
        let id = self.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        Consumer::new(ConsumerId::new(id), sink)
    }

    /// Enqueue a message for its topic
    ///
    /// A `Close` message removes the topic and closes it once everything
    /// queued before it has been delivered.
    pub async fn publish(&self, msg: Msg) -> Result<()> {
        self.mailbox
            .send(Signal::Publish(msg))
            .await
            .map_err(|_| BrokerError::Closed)
    }

    /// Replace the consumer's subscription set
    ///
    /// `topics` maps topic names to the last version the consumer holds
    /// (`0` for nothing). Topics new to the set are subscribed, topics missing
    /// from it are left; topics present in both are untouched. Returns once
    /// every catch-up batch has been handed to the consumer.
    pub async fn subscribe(&self, consumer: &Consumer, topics: HashMap<String, i64>) -> Result<()> {
        let consumer = consumer.clone();
        self.request(|reply| Signal::Subscribe {
            consumer,
            topics,
            reply,
        })
        .await
    }

    /// Leave every topic and forget the consumer
    pub async fn unsubscribe(&self, id: ConsumerId) -> Result<()> {
        self.request(|reply| Signal::Unsubscribe { id, reply }).await
    }

    /// Current state of one topic, or of all topics for `""` and `"*"`
    pub async fn replay(&self, topic: &str) -> Result<Vec<Msg>> {
        let topic = topic.to_owned();
        self.request(|reply| Signal::Replay { topic, reply }).await
    }

    pub async fn stats(&self) -> Result<BrokerStats> {
        let mut stats = self.request(|reply| Signal::Stats { reply }).await?;
        stats.queued = self.mailbox.max_capacity() - self.mailbox.capacity();
        Ok(stats)
    }

    /// Statistics for every live topic, sorted by name
    pub async fn topic_stats(&self) -> Result<Vec<TopicStats>> {
        self.request(|reply| Signal::TopicStats { reply }).await
    }

    /// Wait until every message published before this call has been delivered
    pub async fn flush(&self) -> Result<()> {
        self.request(|reply| Signal::Flush { reply }).await
    }

    /// Publish everything from `input`; shut down when it is exhausted
    pub fn consume(&self, mut input: mpsc::Receiver<Msg>) -> JoinHandle<()> {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            while let Some(msg) = input.recv().await {
                if mailbox.send(Signal::Publish(msg)).await.is_err() {
                    return;
                }
            }
            tracing::debug!("Upstream closed");
            let _ = mailbox.send(Signal::Shutdown).await;
        })
    }

    /// Close every topic and stop the broker, waiting for it to finish
    pub async fn shutdown(&self) {
        let _ = self.mailbox.send(Signal::Shutdown).await;
        self.wait().await;
    }

    /// Wait until the broker has shut down
    pub async fn wait(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn request<T>(&self, signal: impl FnOnce(oneshot::Sender<T>) -> Signal) -> Result<T> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(signal(tx))
            .await
            .map_err(|_| BrokerError::Closed)?;
        rx.await.map_err(|_| BrokerError::Closed)
    }
}

/// State owned by the broker task
struct BrokerState {
    config: BrokerConfig,
    topics: HashMap<String, Spreader>,
    consumers: HashMap<ConsumerId, HashMap<String, i64>>,
    current: Option<CurrentHook>,
}

impl BrokerState {
    fn new(config: BrokerConfig, current: Option<CurrentHook>) -> Self {
        Self {
            config,
            topics: HashMap::new(),
            consumers: HashMap::new(),
            current,
        }
    }

    async fn handle(&mut self, signal: Signal) {
        match signal {
            Signal::Publish(msg) => self.on_message(msg).await,
            Signal::Subscribe {
                consumer,
                topics,
                reply,
            } => {
                self.subscribe(consumer, topics).await;
                let _ = reply.send(());
            }
            Signal::Unsubscribe { id, reply } => {
                self.unsubscribe(id).await;
                let _ = reply.send(());
            }
            Signal::Replay { topic, reply } => {
                let _ = reply.send(self.replay(&topic).await);
            }
            Signal::Stats { reply } => {
                let _ = reply.send(BrokerStats {
                    queued: 0,
                    topics: self.topics.len(),
                    consumers: self.consumers.len(),
                });
            }
            Signal::TopicStats { reply } => {
                let _ = reply.send(self.topic_stats().await);
            }
            Signal::Flush { reply } => {
                for spreader in self.topics.values() {
                    spreader.flush().await;
                }
                let _ = reply.send(());
            }
            // Handled by the run loop
            Signal::Shutdown => {}
        }
    }

    async fn on_message(&mut self, msg: Msg) {
        if msg.is_close() {
            if let Some(spreader) = self.topics.remove(msg.topic.as_ref()) {
                tracing::info!(topic = %msg.topic, "Topic closed by message");
                spreader.close().await;
            }
            return;
        }

        let name = msg.topic.clone();
        self.find_or_create(&name, !msg.is_full())
            .publish(msg)
            .await;
    }

    fn find_or_create(&mut self, name: &str, request_current: bool) -> &mut Spreader {
        match self.topics.entry(name.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let shards = self.config.shards_for(name);
                let spreader = Spreader::spawn(name, shards, &self.config.topic);

                match (&self.current, request_current) {
                    (Some(hook), true) => {
                        tracing::info!(topic = %name, shards = shards, "Topic created, requesting current state");
                        let hook = hook.clone();
                        let name = name.to_owned();
                        tokio::spawn(async move { hook(name) });
                    }
                    _ => {
                        tracing::info!(topic = %name, shards = shards, "Topic created");
                    }
                }

                entry.insert(spreader)
            }
        }
    }

    async fn subscribe(&mut self, consumer: Consumer, topics: HashMap<String, i64>) {
        let id = consumer.id();
        let old = self.consumers.insert(id, topics.clone()).unwrap_or_default();

        for (name, &ts) in &topics {
            if !old.contains_key(name) {
                self.find_or_create(name, true)
                    .subscribe(consumer.clone(), ts)
                    .await;
            }
        }
        for name in old.keys() {
            if !topics.contains_key(name) {
                self.leave(name, id).await;
            }
        }

        tracing::debug!(consumer = %id, topics = topics.len(), "Subscriptions updated");
    }

    async fn unsubscribe(&mut self, id: ConsumerId) {
        let Some(old) = self.consumers.remove(&id) else {
            return;
        };
        for name in old.keys() {
            self.leave(name, id).await;
        }
        tracing::debug!(consumer = %id, topics = old.len(), "Consumer unsubscribed");
    }

    /// Remove a consumer from one topic, closing the topic if it empties
    async fn leave(&mut self, name: &str, id: ConsumerId) {
        let Some(spreader) = self.topics.get_mut(name) else {
            return;
        };
        if !spreader.unsubscribe(id).await {
            return;
        }
        if let Some(spreader) = self.topics.remove(name) {
            tracing::info!(topic = %name, "Topic closed, no subscribers left");
            spreader.close().await;
        }
    }

    async fn replay(&self, topic: &str) -> Vec<Msg> {
        let msgs = if topic.is_empty() || topic == "*" {
            let mut msgs = Vec::new();
            for spreader in self.topics.values() {
                msgs.extend(spreader.replay().await);
            }
            msgs
        } else {
            match self.topics.get(topic) {
                Some(spreader) => spreader.replay().await,
                None => Vec::new(),
            }
        };

        tracing::debug!(topic = %topic, msgs = msgs.len(), "Replay");
        msgs
    }

    async fn topic_stats(&self) -> Vec<TopicStats> {
        let mut stats = Vec::with_capacity(self.topics.len());
        for spreader in self.topics.values() {
            stats.push(spreader.stats().await);
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    async fn remove_expired(&mut self, ttl: Duration) {
        let expired: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, spreader)| spreader.is_expired(ttl))
            .map(|(name, _)| name.clone())
            .collect();

        for name in expired {
            if let Some(spreader) = self.topics.remove(&name) {
                tracing::info!(topic = %name, ttl_secs = ttl.as_secs(), "Topic expired");
                spreader.close().await;
            }
        }
    }

    async fn close(&mut self) {
        let topics = self.topics.len();
        for (_, spreader) in self.topics.drain() {
            spreader.close().await;
        }
        self.consumers.clear();
        tracing::info!(topics = topics, "Broker shut down");
    }
}

async fn run(mut state: BrokerState, mut mailbox: mpsc::Receiver<Signal>, closed: watch::Sender<bool>) {
    let expiry = state.config.topic_expiry;
    // The field is public, so the builder clamp can be bypassed
    let period = state
        .config
        .expiry_check_interval
        .max(MIN_EXPIRY_CHECK_INTERVAL);
    let mut expiry_check = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    expiry_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            signal = mailbox.recv() => match signal {
                Some(Signal::Shutdown) | None => break,
                Some(signal) => state.handle(signal).await,
            },
            _ = expiry_check.tick(), if expiry.is_some() => {
                if let Some(ttl) = expiry {
                    let started = Instant::now();
                    state.remove_expired(ttl).await;
                    tracing::trace!(elapsed_us = started.elapsed().as_micros() as u64, "Expiry check");
                }
            }
        }
    }

    // Publishes already accepted are still delivered; requests get `Closed`
    mailbox.close();
    let mut drained = 0;
    while let Some(signal) = mailbox.recv().await {
        if let Signal::Publish(msg) = signal {
            state.on_message(msg).await;
            drained += 1;
        }
    }
    if drained > 0 {
        tracing::debug!(msgs = drained, "Drained publishes queued behind shutdown");
    }

    state.close().await;
    let _ = closed.send(true);
}
