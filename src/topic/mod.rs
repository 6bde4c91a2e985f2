//! Topics and their subscribers
//!
//! A topic is a tokio task that owns one cache and the cursor of every
//! subscriber. Hot topics are split into several identical shards behind a
//! [`Spreader`].
//!
//! # Architecture
//!
//! ```text
//!                        Spreader("prices")
//!            ┌───────────────────┼───────────────────┐
//!            │ publish(msg) is sent to every shard    │
//!            ▼                   ▼                   ▼
//!       Topic shard 0       Topic shard 1       Topic shard 2
//!     ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//!     │ TopicCache   │    │ TopicCache   │    │ TopicCache   │
//!     │ cursors      │    │ cursors      │    │ cursors      │
//!     └──────┬───────┘    └──────┬───────┘    └──────┬───────┘
//!            │                   │                   │
//!            ▼                   ▼                   ▼
//!     Subscriber::send    Subscriber::send    Subscriber::send
//! ```
//!
//! Each consumer is assigned to one shard round-robin on its first subscribe
//! and keeps that shard until it unsubscribes.
//!
//! # Delivery
//!
//! Subscribers are called synchronously from the topic task. A subscriber
//! that blocks stalls its whole shard; [`QueueSubscriber`] is a non-blocking
//! implementation backed by a bounded queue.

pub mod actor;
pub mod spreader;
pub mod subscriber;

pub use actor::Topic;
pub use spreader::Spreader;
pub use subscriber::{Consumer, ConsumerId, QueueSubscriber, Subscriber};
