//! Statistics for the broker and its topics

use std::collections::HashMap;
use std::time::Duration;

use crate::cache::CacheKind;

/// Broker-wide gauges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Signals waiting in the broker mailbox
    pub queued: usize,
    /// Live topics
    pub topics: usize,
    /// Consumers with a subscription set
    pub consumers: usize,
}

/// Topic-level statistics
#[derive(Debug, Clone)]
pub struct TopicStats {
    /// Topic name
    pub name: String,
    /// Number of shards serving the topic
    pub shards: usize,
    /// Current subscribers, across all shards
    pub subscribers: usize,
    /// Cache strategy, `None` until the first cacheable message
    pub cache: Option<CacheKind>,
    /// Messages held in the cache
    pub cached: usize,
    /// Messages published to the topic
    pub received: u64,
    /// Messages handed to subscribers, burst markers included
    pub delivered: u64,
    /// Time since the last publish (or since creation)
    pub idle: Duration,
    /// Metadata reported by each subscriber
    pub subscriber_meta: Vec<HashMap<String, String>>,
}

impl TopicStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shards: 1,
            subscribers: 0,
            cache: None,
            cached: 0,
            received: 0,
            delivered: 0,
            idle: Duration::ZERO,
            subscriber_meta: Vec::new(),
        }
    }

    /// Fold another shard of the same topic into these stats
    ///
    /// Subscriber and delivery figures add up; cache figures are identical on
    /// every shard and are kept as they are.
    pub fn merge_shard(&mut self, shard: TopicStats) {
        self.shards += shard.shards;
        self.subscribers += shard.subscribers;
        self.delivered += shard.delivered;
        self.idle = self.idle.min(shard.idle);
        self.subscriber_meta.extend(shard.subscriber_meta);
    }

    /// Average number of messages delivered per published message
    pub fn fan_out(&self) -> f64 {
        if self.received > 0 {
            self.delivered as f64 / self.received as f64
        } else {
            0.0
        }
    }
}
