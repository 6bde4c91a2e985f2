//! Versioned topic fan-out broker
//!
//! Producers publish versioned messages to named topics; consumers subscribe
//! with the last version they hold and receive exactly what they are missing,
//! followed by live updates, with no gaps and no duplicates.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use fanout_broker::{Broker, BrokerConfig, Msg, QueueSubscriber};
//!
//! # async fn run() -> fanout_broker::Result<()> {
//! let broker = Broker::new(BrokerConfig::default());
//!
//! let (sink, mut rx) = QueueSubscriber::channel(256);
//! let consumer = broker.consumer(Arc::new(sink));
//! broker
//!     .subscribe(&consumer, HashMap::from([("prices".to_string(), 0)]))
//!     .await?;
//!
//! broker.publish(Msg::full("prices", 1, Bytes::from_static(b"{}"))).await?;
//! let msg = rx.recv().await;
//! # let _ = msg;
//! # Ok(())
//! # }
//! ```
//!
//! # Caching
//!
//! Each topic picks a cache from the first message it sees: a full/diff cache
//! that replays the last full state plus later diffs, or a bounded log for
//! append-style topics. See [`cache`].

pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod msg;
pub mod stats;
pub mod topic;

pub use broker::{Broker, ReplayBroker};
pub use config::{BrokerConfig, TopicConfig};
pub use error::{BrokerError, Result};
pub use msg::{Msg, UpdateType, TS_NONE};
pub use stats::{BrokerStats, TopicStats};
pub use topic::{Consumer, ConsumerId, QueueSubscriber, Subscriber};
