//! Broker and topic configuration

use std::collections::HashMap;
use std::time::Duration;

use crate::cache::append::DEFAULT_DEPTH;

/// Shortest accepted expiry check interval
pub const MIN_EXPIRY_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Per-topic actor options
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Bounded mailbox size of each topic actor
    pub mailbox_capacity: usize,

    /// Starting retention depth of append caches
    pub append_depth: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 128,
            append_depth: DEFAULT_DEPTH,
        }
    }
}

/// Broker configuration options
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bounded mailbox size of the broker actor
    pub mailbox_capacity: usize,

    /// Options applied to every topic actor
    pub topic: TopicConfig,

    /// Number of shards for topics without an override
    pub default_shards: usize,

    /// Shard count overrides for hot topics
    pub hot_topics: HashMap<String, usize>,

    /// Close topics with no subscribers and no publishes for this long
    pub topic_expiry: Option<Duration>,

    /// How often idle topics are checked for expiry
    pub expiry_check_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            topic: TopicConfig::default(),
            default_shards: 1,
            hot_topics: HashMap::new(),
            topic_expiry: None, // Disabled
            expiry_check_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl BrokerConfig {
    /// Set the broker mailbox capacity
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Set the mailbox capacity of every topic actor
    pub fn topic_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.topic.mailbox_capacity = capacity.max(1);
        self
    }

    /// Set the starting depth of append caches
    pub fn append_depth(mut self, depth: usize) -> Self {
        self.topic.append_depth = depth.max(1);
        self
    }

    /// Set the shard count used for topics without an override
    pub fn default_shards(mut self, shards: usize) -> Self {
        self.default_shards = shards.max(1);
        self
    }

    /// Spread one hot topic over `shards` topic actors
    pub fn shard_topic(mut self, name: impl Into<String>, shards: usize) -> Self {
        self.hot_topics.insert(name.into(), shards.max(1));
        self
    }

    /// Enable expiry of idle topics
    pub fn topic_expiry(mut self, expiry: Duration) -> Self {
        self.topic_expiry = Some(expiry);
        self
    }

    /// Set the idle topic check interval (at least 1ms)
    pub fn expiry_check_interval(mut self, interval: Duration) -> Self {
        self.expiry_check_interval = interval.max(MIN_EXPIRY_CHECK_INTERVAL);
        self
    }

    /// Shard count for a topic
    pub fn shards_for(&self, name: &str) -> usize {
        self.hot_topics
            .get(name)
            .copied()
            .unwrap_or(self.default_shards)
            .max(1)
    }
}
