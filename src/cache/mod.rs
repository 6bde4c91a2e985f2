//! Per-topic delivery caches
//!
//! A topic keeps its history in one of two caches, picked by the update type
//! of the first message the topic sees and never changed afterwards:
//!
//! - [`FullDiffCache`] for `Full`/`Diff` topics: the last full state plus the
//!   diffs applied on top of it.
//! - [`AppendCache`] for `Append`/`Update` topics: a bounded, ordered log.
//!
//! Both answer the same two questions: what does a subscriber joining at a
//! given cursor need ([`TopicCache::find`]), and what does an existing
//! subscriber need when one new message arrives ([`TopicCache::find_for`]).

pub mod append;
pub mod full_diff;

pub use append::AppendCache;
pub use full_diff::FullDiffCache;

use crate::msg::{Msg, UpdateType};

/// Delivery decision for one subscriber and one freshly added message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The subscriber already has it, or must not get it yet
    Nothing,
    /// Push the new message alone
    Msg,
    /// Push the whole current state
    Current,
}

/// Which cache strategy a topic uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    FullDiff,
    Append,
}

/// History of a single topic
#[derive(Debug)]
pub enum TopicCache {
    FullDiff(FullDiffCache),
    Append(AppendCache),
}

impl TopicCache {
    /// Pick the strategy for a topic from its first message
    pub fn for_update_type(update_type: UpdateType, append_depth: usize) -> Self {
        if update_type.is_log() {
            TopicCache::Append(AppendCache::with_depth(append_depth))
        } else {
            TopicCache::FullDiff(FullDiffCache::new())
        }
    }

    pub fn kind(&self) -> CacheKind {
        match self {
            TopicCache::FullDiff(_) => CacheKind::FullDiff,
            TopicCache::Append(_) => CacheKind::Append,
        }
    }

    /// Fold a new message into the history
    pub fn add(&mut self, msg: Msg) {
        match self {
            TopicCache::FullDiff(cache) => cache.add(msg),
            TopicCache::Append(cache) => cache.add(msg),
        }
    }

    /// Catch-up batch for a subscriber joining at `ts`
    pub fn find(&mut self, ts: i64) -> Vec<Msg> {
        match self {
            TopicCache::FullDiff(cache) => cache.find(ts),
            TopicCache::Append(cache) => cache.find(ts),
        }
    }

    /// Decision for a subscriber at `cursor` reacting to `msg`
    pub fn find_for(&self, cursor: i64, msg: &Msg) -> Delivery {
        match self {
            TopicCache::FullDiff(cache) => cache.find_for(cursor, msg),
            TopicCache::Append(cache) => cache.find_for(cursor, msg),
        }
    }

    /// Full reconstructable current state
    pub fn current(&mut self) -> &[Msg] {
        match self {
            TopicCache::FullDiff(cache) => cache.current(),
            TopicCache::Append(cache) => cache.current(),
        }
    }

    /// Number of stored messages
    pub fn len(&self) -> usize {
        match self {
            TopicCache::FullDiff(cache) => cache.len(),
            TopicCache::Append(cache) => cache.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sort by version and drop duplicate versions
///
/// At equal `ts` a live message wins over a replayed one; between two live
/// messages the earlier arrival is kept.
pub(crate) fn sort_dedup(msgs: &mut Vec<Msg>) {
    msgs.sort_by_key(|m| m.ts);
    msgs.dedup_by(|later, kept| {
        if later.ts != kept.ts {
            return false;
        }
        if kept.replay && !later.replay {
            std::mem::swap(later, kept);
        }
        true
    });
}
