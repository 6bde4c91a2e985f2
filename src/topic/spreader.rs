//! Sharded topic
//!
//! A hot topic with many subscribers is served by several identical topic
//! actors. Every publish goes to all shards, so each shard holds the same
//! cache; subscribers are spread over the shards round-robin and stay on the
//! shard they were first given.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::TopicConfig;
use crate::msg::Msg;
use crate::stats::TopicStats;

use super::actor::Topic;
use super::subscriber::{Consumer, ConsumerId};

/// One or more topic actors behind a single topic name
pub struct Spreader {
    name: Arc<str>,
    shards: Vec<Topic>,
    assignments: HashMap<ConsumerId, usize>,
    next: usize,
    last_publish: Instant,
}

impl Spreader {
    /// Spawn `shards` topic actors (at least one)
    pub fn spawn(name: impl Into<Arc<str>>, shards: usize, config: &TopicConfig) -> Self {
        let name = name.into();
        let shards = (0..shards.max(1))
            .map(|_| Topic::spawn(name.clone(), config))
            .collect();

        Self {
            name,
            shards,
            assignments: HashMap::new(),
            next: 0,
            last_publish: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.assignments.len()
    }

    /// Send the message to every shard
    pub async fn publish(&mut self, msg: Msg) {
        self.last_publish = Instant::now();

        let Some((last, rest)) = self.shards.split_last() else {
            return;
        };
        for shard in rest {
            shard.publish(msg.clone()).await;
        }
        last.publish(msg).await;
    }

    /// Subscribe on the consumer's shard, assigning one on first sight
    pub async fn subscribe(&mut self, consumer: Consumer, ts: i64) {
        let shard_count = self.shards.len();
        let next = &mut self.next;
        let idx = *self.assignments.entry(consumer.id()).or_insert_with(|| {
            let idx = *next;
            *next = (*next + 1) % shard_count;
            idx
        });
        self.shards[idx].subscribe(consumer, ts).await;
    }

    /// Remove a consumer
    ///
    /// Returns `true` only when this call removed the last subscriber. A
    /// consumer that was never assigned here leaves the topic untouched and
    /// yields `false`, even if the topic has no subscribers.
    pub async fn unsubscribe(&mut self, id: ConsumerId) -> bool {
        let Some(idx) = self.assignments.remove(&id) else {
            return false;
        };
        self.shards[idx].unsubscribe(id).await;
        self.assignments.is_empty()
    }

    /// Current state; every shard holds the same one
    pub async fn replay(&self) -> Vec<Msg> {
        match self.shards.first() {
            Some(shard) => shard.replay().await,
            None => Vec::new(),
        }
    }

    pub async fn stats(&self) -> TopicStats {
        let mut merged: Option<TopicStats> = None;
        for shard in &self.shards {
            let Some(stats) = shard.stats().await else {
                continue;
            };
            match merged.as_mut() {
                Some(merged) => merged.merge_shard(stats),
                None => merged = Some(stats),
            }
        }
        merged.unwrap_or_else(|| TopicStats::new(self.name.as_ref()))
    }

    /// Wait until every shard has processed everything sent so far
    pub async fn flush(&self) {
        for shard in &self.shards {
            shard.flush().await;
        }
    }

    /// Whether the topic has had no subscribers and no publishes for `ttl`
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.assignments.is_empty() && self.last_publish.elapsed() >= ttl
    }

    /// Close every shard, waiting for queued messages to be delivered
    pub async fn close(self) {
        for shard in self.shards {
            shard.close().await;
        }
        tracing::debug!(topic = %self.name, "Topic closed");
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::topic::subscriber::recorder;

    fn full(ts: i64) -> Msg {
        Msg::full("m", ts, Bytes::new())
    }

    fn diff(ts: i64) -> Msg {
        Msg::diff("m", ts, Bytes::new())
    }

    #[tokio::test]
    async fn test_spreader() {
        let mut s = Spreader::spawn("m", 4, &TopicConfig::default());
        s.publish(full(10)).await;
        s.publish(diff(11)).await;
        s.publish(diff(13)).await;
        s.publish(diff(12)).await;

        let msgs = s.replay().await;
        let ts: Vec<i64> = msgs.iter().map(|m| m.ts).collect();
        assert_eq!(ts, vec![10, 11, 12, 13]);

        let (c1, r1) = recorder(1);
        let (c2, r2) = recorder(2);
        let (c3, _) = recorder(3);
        let (c4, _) = recorder(4);
        let (c5, _) = recorder(5);

        s.subscribe(c1.clone(), 0).await;
        s.subscribe(c2.clone(), 0).await;
        assert_eq!(r1.len(), 6);
        assert_eq!(r2.len(), 6);

        s.subscribe(c3.clone(), 0).await;
        s.subscribe(c4.clone(), 0).await;
        s.publish(diff(14)).await;
        s.flush().await;
        assert_eq!(r1.len(), 7);
        assert_eq!(r2.len(), 7);

        s.unsubscribe(c1.id()).await;
        s.subscribe(c5.clone(), 0).await;
        s.publish(diff(15)).await;
        s.flush().await;
        assert_eq!(r1.len(), 7);
        assert_eq!(r2.len(), 8);

        for c in [&c1, &c2, &c3, &c4] {
            assert!(!s.unsubscribe(c.id()).await);
        }
        assert!(s.unsubscribe(c5.id()).await);

        s.subscribe(c2, 0).await;
        s.close().await;
        // Full state again: six messages framed by burst markers
        assert_eq!(r2.len(), 16);
    }

    #[tokio::test]
    async fn test_spreader_close_delivers_everything() {
        let mut s = Spreader::spawn("m", 4, &TopicConfig::default());
        let mut recorders = Vec::new();
        for id in 0..100 {
            let (consumer, rec) = recorder(id);
            s.subscribe(consumer, 0).await;
            recorders.push(rec);
        }

        s.publish(full(1)).await;
        for ts in 1..=100 {
            s.publish(diff(ts)).await;
        }
        s.close().await;

        for rec in recorders {
            assert_eq!(rec.len(), 100);
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_consumer_is_not_emptying() {
        let mut s = Spreader::spawn("m", 2, &TopicConfig::default());
        assert!(!s.unsubscribe(ConsumerId::new(9)).await);

        let (consumer, _) = recorder(1);
        s.subscribe(consumer, 0).await;
        assert!(!s.unsubscribe(ConsumerId::new(9)).await);
        assert!(s.unsubscribe(ConsumerId::new(1)).await);
        // Already gone
        assert!(!s.unsubscribe(ConsumerId::new(1)).await);
        s.close().await;
    }

    #[tokio::test]
    async fn test_round_robin_is_sticky() {
        let mut s = Spreader::spawn("m", 3, &TopicConfig::default());
        for id in 0..6 {
            let (consumer, _) = recorder(id);
            s.subscribe(consumer, 0).await;
        }
        // Re-subscribing keeps the original shard
        let (again, _) = recorder(0);
        s.subscribe(again, 0).await;

        let stats = s.stats().await;
        assert_eq!(stats.shards, 3);
        assert_eq!(stats.subscribers, 6);
        assert_eq!(s.subscriber_count(), 6);
        assert_eq!(s.assignments[&ConsumerId::new(0)], 0);
        assert_eq!(s.assignments[&ConsumerId::new(4)], 1);
        s.close().await;
    }

    #[tokio::test]
    async fn test_shards_agree_on_state() {
        let mut s = Spreader::spawn("m", 4, &TopicConfig::default());
        s.publish(full(1)).await;
        s.publish(diff(3)).await;
        s.publish(diff(2)).await;
        s.flush().await;

        let expected = s.shards[0].replay().await;
        for shard in &s.shards[1..] {
            assert_eq!(shard.replay().await, expected);
        }

        let stats = s.stats().await;
        assert_eq!(stats.received, 3);
        assert_eq!(stats.cached, 3);
        s.close().await;
    }

    #[tokio::test]
    async fn test_expiry() {
        let mut s = Spreader::spawn("m", 1, &TopicConfig::default());
        assert!(s.is_expired(Duration::ZERO));
        assert!(!s.is_expired(Duration::from_secs(3600)));

        let (consumer, _) = recorder(1);
        s.subscribe(consumer, 0).await;
        assert!(!s.is_expired(Duration::ZERO));
        s.close().await;
    }
}
