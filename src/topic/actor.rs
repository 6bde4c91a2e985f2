//! Topic actor
//!
//! A topic owns one cache and the cursors of its subscribers. All state lives
//! inside a single tokio task; the [`Topic`] handle only talks to it through
//! the mailbox. `publish` just enqueues, every other operation waits for the
//! task to answer, which orders it against all earlier publishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cache::{Delivery, TopicCache};
use crate::config::TopicConfig;
use crate::msg::{burst, Msg, TS_NONE};
use crate::stats::TopicStats;

use super::subscriber::{Consumer, ConsumerId};

/// Requests handled by the topic task
enum Signal {
    Publish(Msg),
    Subscribe {
        consumer: Consumer,
        ts: i64,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        id: ConsumerId,
        reply: oneshot::Sender<bool>,
    },
    Replay {
        reply: oneshot::Sender<Vec<Msg>>,
    },
    Stats {
        reply: oneshot::Sender<TopicStats>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// A subscriber and the version it last received
struct Subscription {
    consumer: Consumer,
    cursor: i64,
}

impl Subscription {
    /// Push a live batch; the cursor never moves backwards
    fn deliver(&mut self, msgs: &[Msg]) {
        let Some(last) = msgs.last() else {
            return;
        };
        self.cursor = self.cursor.max(last.ts);
        self.consumer.send_batch(msgs);
    }
}

/// State owned by the topic task
struct TopicState {
    name: Arc<str>,
    cache: Option<TopicCache>,
    subscriptions: HashMap<ConsumerId, Subscription>,
    append_depth: usize,
    created_at: Instant,
    last_publish: Option<Instant>,
    received: u64,
    delivered: u64,
}

impl TopicState {
    fn new(name: Arc<str>, config: &TopicConfig) -> Self {
        Self {
            name,
            cache: None,
            subscriptions: HashMap::new(),
            append_depth: config.append_depth,
            created_at: Instant::now(),
            last_publish: None,
            received: 0,
            delivered: 0,
        }
    }

    fn on_message(&mut self, msg: Msg) {
        let started = Instant::now();
        self.received += 1;
        self.last_publish = Some(started);

        if msg.is_event() {
            for sub in self.subscriptions.values() {
                sub.consumer.send(msg.clone());
            }
            self.delivered += self.subscriptions.len() as u64;
            return;
        }

        let depth = self.append_depth;
        let cache = self
            .cache
            .get_or_insert_with(|| TopicCache::for_update_type(msg.update_type, depth));
        cache.add(msg.clone());

        // Built once per message, shared by every subscriber that needs it
        let mut current: Option<Vec<Msg>> = None;
        let mut delivered = 0;
        for sub in self.subscriptions.values_mut() {
            match cache.find_for(sub.cursor, &msg) {
                Delivery::Nothing => {}
                Delivery::Msg => {
                    sub.deliver(std::slice::from_ref(&msg));
                    delivered += 1;
                }
                Delivery::Current => {
                    let batch = current.get_or_insert_with(|| burst(cache.current()));
                    sub.deliver(batch);
                    delivered += batch.len() as u64;
                }
            }
        }
        self.delivered += delivered;

        if delivered > 0 {
            tracing::trace!(
                topic = %self.name,
                ts = msg.ts,
                subscribers = self.subscriptions.len(),
                delivered = delivered,
                elapsed_us = started.elapsed().as_micros() as u64,
                "Message delivered"
            );
        }
    }

    fn subscribe(&mut self, consumer: Consumer, ts: i64) {
        let ts = if ts <= 0 { TS_NONE } else { ts };
        let id = consumer.id();
        let mut sub = Subscription {
            consumer,
            cursor: ts,
        };

        let mut catchup = 0;
        if let Some(cache) = self.cache.as_mut() {
            let batch = burst(&cache.find(ts));
            if let Some(last) = batch.last() {
                sub.cursor = last.ts;
                sub.consumer.send_batch(&batch);
                catchup = batch.len();
            }
        }
        self.delivered += catchup as u64;
        self.subscriptions.insert(id, sub);

        tracing::debug!(
            topic = %self.name,
            consumer = %id,
            subscribers = self.subscriptions.len(),
            catchup = catchup,
            "Subscriber added"
        );
    }

    fn unsubscribe(&mut self, id: ConsumerId) -> bool {
        if self.subscriptions.remove(&id).is_some() {
            tracing::debug!(
                topic = %self.name,
                consumer = %id,
                subscribers = self.subscriptions.len(),
                "Subscriber removed"
            );
        }
        self.subscriptions.is_empty()
    }

    fn replay(&mut self) -> Vec<Msg> {
        match self.cache.as_mut() {
            Some(cache) => cache.current().iter().map(Msg::as_replay).collect(),
            None => Vec::new(),
        }
    }

    fn stats(&self) -> TopicStats {
        let mut stats = TopicStats::new(self.name.as_ref());
        stats.subscribers = self.subscriptions.len();
        stats.cache = self.cache.as_ref().map(TopicCache::kind);
        stats.cached = self.cache.as_ref().map_or(0, TopicCache::len);
        stats.received = self.received;
        stats.delivered = self.delivered;
        stats.idle = self.last_publish.unwrap_or(self.created_at).elapsed();
        stats.subscriber_meta = self
            .subscriptions
            .values()
            .map(|sub| sub.consumer.meta())
            .collect();
        stats
    }
}

async fn run(mut state: TopicState, mut mailbox: mpsc::Receiver<Signal>) {
    while let Some(signal) = mailbox.recv().await {
        match signal {
            Signal::Publish(msg) => state.on_message(msg),
            Signal::Subscribe {
                consumer,
                ts,
                reply,
            } => {
                state.subscribe(consumer, ts);
                let _ = reply.send(());
            }
            Signal::Unsubscribe { id, reply } => {
                let _ = reply.send(state.unsubscribe(id));
            }
            Signal::Replay { reply } => {
                let _ = reply.send(state.replay());
            }
            Signal::Stats { reply } => {
                let _ = reply.send(state.stats());
            }
            Signal::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }

    tracing::debug!(
        topic = %state.name,
        received = state.received,
        "Topic drained"
    );
}

/// Handle to a running topic actor
///
/// The handle is the only sender into the topic's mailbox; [`Topic::close`]
/// consumes it, so nothing can be sent to a topic after it has been closed.
pub struct Topic {
    name: Arc<str>,
    mailbox: mpsc::Sender<Signal>,
    task: JoinHandle<()>,
}

impl Topic {
    /// Spawn a topic actor on the current tokio runtime
    pub fn spawn(name: impl Into<Arc<str>>, config: &TopicConfig) -> Self {
        let name = name.into();
        let (mailbox, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let state = TopicState::new(name.clone(), config);
        let task = tokio::spawn(run(state, rx));

        Self {
            name,
            mailbox,
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a message; waits only for mailbox capacity
    pub async fn publish(&self, msg: Msg) {
        if self.mailbox.send(Signal::Publish(msg)).await.is_err() {
            self.warn_gone("publish");
        }
    }

    /// Subscribe a consumer that last saw version `ts`
    ///
    /// `ts <= 0` means the consumer has nothing yet. Returns once the catch-up
    /// batch has been handed to the consumer.
    pub async fn subscribe(&self, consumer: Consumer, ts: i64) {
        self.request(|reply| Signal::Subscribe {
            consumer,
            ts,
            reply,
        })
        .await;
    }

    /// Remove a consumer; returns whether the topic has no subscribers left
    pub async fn unsubscribe(&self, id: ConsumerId) -> bool {
        self.request(|reply| Signal::Unsubscribe { id, reply })
            .await
            .unwrap_or(true)
    }

    /// Current state, every message flagged as a replay
    pub async fn replay(&self) -> Vec<Msg> {
        self.request(|reply| Signal::Replay { reply })
            .await
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> Option<TopicStats> {
        self.request(|reply| Signal::Stats { reply }).await
    }

    /// Wait until everything enqueued before this call has been delivered
    pub async fn flush(&self) {
        self.request(|reply| Signal::Flush { reply }).await;
    }

    /// Stop accepting messages, drain the mailbox and wait for the task to exit
    pub async fn close(self) {
        let Self {
            name,
            mailbox,
            task,
        } = self;
        drop(mailbox);

        if let Err(e) = task.await {
            tracing::warn!(topic = %name, error = %e, "Topic task failed");
        }
    }

    async fn request<T>(&self, signal: impl FnOnce(oneshot::Sender<T>) -> Signal) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if self.mailbox.send(signal(tx)).await.is_err() {
            self.warn_gone("request");
            return None;
        }
        match rx.await {
            Ok(value) => Some(value),
            Err(_) => {
                self.warn_gone("reply");
                None
            }
        }
    }

    fn warn_gone(&self, op: &'static str) {
        tracing::warn!(topic = %self.name, op = op, "Topic task is gone");
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::msg::UpdateType;
    use crate::topic::subscriber::recorder;

    fn full(ts: i64) -> Msg {
        Msg::full("t", ts, Bytes::new())
    }

    fn diff(ts: i64) -> Msg {
        Msg::diff("t", ts, Bytes::new())
    }

    fn append(ts: i64) -> Msg {
        Msg::append("t", ts, Bytes::new())
    }

    fn topic() -> Topic {
        Topic::spawn("t", &TopicConfig::default())
    }

    #[tokio::test]
    async fn test_replay_sorted() {
        let topic = topic();
        topic.publish(full(10)).await;
        topic.publish(diff(11)).await;
        topic.publish(diff(13)).await;
        topic.publish(diff(12)).await;

        let msgs = topic.replay().await;

        let ts: Vec<i64> = msgs.iter().map(|m| m.ts).collect();
        assert_eq!(ts, vec![10, 11, 12, 13]);
        assert!(msgs.iter().all(|m| m.replay));
        topic.close().await;
    }

    #[tokio::test]
    async fn test_replay_empty_topic() {
        let topic = topic();
        assert!(topic.replay().await.is_empty());
        topic.close().await;
    }

    #[tokio::test]
    async fn test_subscribe_catchup_with_burst() {
        let topic = topic();
        for msg in [full(101), diff(105), diff(107), diff(111)] {
            topic.publish(msg).await;
        }

        let (fresh, fresh_rx) = recorder(1);
        let (behind, behind_rx) = recorder(2);
        let (ahead, ahead_rx) = recorder(3);
        topic.subscribe(fresh, 0).await;
        topic.subscribe(behind, 105).await;
        topic.subscribe(ahead, 1000).await;

        let msgs = fresh_rx.msgs();
        assert_eq!(msgs.len(), 6);
        assert_eq!(msgs[0].update_type, UpdateType::BurstStart);
        assert_eq!(msgs[5].update_type, UpdateType::BurstEnd);
        assert_eq!(fresh_rx.ts(), vec![101, 105, 107, 111]);

        // Two messages go out without burst markers
        assert_eq!(behind_rx.len(), 2);
        assert_eq!(behind_rx.ts(), vec![107, 111]);

        assert_eq!(ahead_rx.ts(), vec![101, 105, 107, 111]);
        topic.close().await;
    }

    #[tokio::test]
    async fn test_live_delivery_advances_cursor() {
        let topic = topic();
        let (consumer, rx) = recorder(1);
        topic.subscribe(consumer, 0).await;

        // Diffs before any full are held back from a fresh subscriber
        topic.publish(diff(1)).await;
        topic.publish(full(2)).await;
        topic.publish(diff(3)).await;
        topic.publish(diff(3)).await;
        topic.publish(diff(4).with_replay()).await;
        topic.publish(diff(4)).await;
        topic.flush().await;

        assert_eq!(rx.ts(), vec![2, 3, 4]);
        topic.close().await;
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards() {
        let topic = topic();
        let (consumer, rx) = recorder(1);
        topic.publish(full(10)).await;
        topic.subscribe(consumer, 0).await;

        topic.publish(diff(12)).await;
        // Late live diff still goes out, but the cursor stays at 12
        topic.publish(diff(11)).await;
        topic.publish(diff(12).with_replay()).await;
        topic.flush().await;

        assert_eq!(rx.ts(), vec![10, 12, 11]);
        topic.close().await;
    }

    #[tokio::test]
    async fn test_full_pushes_current_to_waiting_subscriber() {
        let topic = topic();
        let (waiting, waiting_rx) = recorder(1);
        let (synced, synced_rx) = recorder(2);
        topic.publish(diff(5)).await;
        topic.subscribe(waiting, 0).await;
        topic.subscribe(synced, 5).await;

        topic.publish(full(4)).await;
        topic.flush().await;

        // Full at 4 plus the diff at 5 that follows it
        assert_eq!(waiting_rx.ts(), vec![4, 5]);
        assert!(synced_rx.msgs().is_empty());
        topic.close().await;
    }

    #[tokio::test]
    async fn test_append_topic_delivery() {
        let topic = topic();
        topic.publish(append(1)).await;
        topic.publish(append(2)).await;
        topic.publish(append(3)).await;

        let (fresh, fresh_rx) = recorder(1);
        let (behind, behind_rx) = recorder(2);
        topic.subscribe(fresh, 0).await;
        topic.subscribe(behind, 2).await;
        topic.publish(append(4)).await;
        topic.flush().await;

        assert_eq!(fresh_rx.ts(), vec![1, 2, 3, 4]);
        assert_eq!(behind_rx.ts(), vec![3, 4]);
        topic.close().await;
    }

    #[tokio::test]
    async fn test_events_bypass_cache() {
        let topic = topic();
        let (consumer, rx) = recorder(1);
        topic.subscribe(consumer, 0).await;

        topic.publish(Msg::event("t", 7, Bytes::from_static(b"ping"))).await;
        topic.flush().await;

        assert_eq!(rx.len(), 1);
        assert!(topic.replay().await.is_empty());
        let stats = topic.stats().await.unwrap();
        assert!(stats.cache.is_none());
        topic.close().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_reports_empty() {
        let topic = topic();
        let (first, first_rx) = recorder(1);
        let (second, _) = recorder(2);
        topic.subscribe(first.clone(), 0).await;
        topic.subscribe(second.clone(), 0).await;

        assert!(!topic.unsubscribe(first.id()).await);
        topic.publish(full(1)).await;
        topic.flush().await;
        assert!(first_rx.msgs().is_empty());

        assert!(topic.unsubscribe(second.id()).await);
        topic.close().await;
    }

    #[tokio::test]
    async fn test_close_drains_mailbox() {
        let topic = Topic::spawn("t", &TopicConfig::default());
        let (consumer, rx) = recorder(1);
        topic.subscribe(consumer, 0).await;

        topic.publish(full(1)).await;
        for ts in 1..=100 {
            topic.publish(diff(ts)).await;
        }
        topic.close().await;

        assert_eq!(rx.len(), 100);
    }

    #[tokio::test]
    async fn test_stats() {
        let topic = topic();
        let (consumer, _) = recorder(1);
        topic.subscribe(consumer, 0).await;
        topic.publish(full(1)).await;
        topic.publish(diff(2)).await;

        let stats = topic.stats().await.unwrap();

        assert_eq!(stats.name, "t");
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.cached, 2);
        assert_eq!(stats.subscriber_meta.len(), 1);
        topic.close().await;
    }
}
