//! Topic broker
//!
//! The broker routes published messages to topics, creates topics on first
//! use and keeps every consumer's subscription set so that a new set can be
//! applied as a diff against the old one.
//!
//! # Architecture
//!
//! ```text
//!   upstream mpsc::Receiver<Msg>
//!            │ consume()
//!            ▼
//!   ┌─────────────────────────────┐      subscribe(consumer, {topic: ts})
//!   │ Broker task                 │◄──── unsubscribe(id)
//!   │  topics:    name → Spreader │◄──── replay(topic)
//!   │  consumers: id → {topic:ts} │
//!   └──────────────┬──────────────┘
//!                  │ publish / subscribe
//!       ┌──────────┼──────────┐
//!       ▼          ▼          ▼
//!    Spreader   Spreader   Spreader ──► Topic shards ──► Subscribers
//! ```
//!
//! # Shutdown
//!
//! When the upstream receiver is exhausted (or [`Broker::shutdown`] is
//! called) the broker closes every topic, waits for each to deliver what it
//! has queued, and then flips its closed flag; [`Broker::wait`] returns at
//! that point and every later request fails with [`BrokerError::Closed`].
//!
//! [`BrokerError::Closed`]: crate::error::BrokerError::Closed

pub mod replay;
pub mod store;

pub use replay::ReplayBroker;
pub use store::{Broker, CurrentHook};
