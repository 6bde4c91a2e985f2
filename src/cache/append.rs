//! Append cache for log-style topics
//!
//! `Append`/`Update` topics are modelled as a bounded, ordered log. A
//! subscriber that joins with a cursor inside the retained window receives
//! the entries after it; anyone else receives everything retained.
//!
//! The retention depth starts at the configured default and can be changed
//! by any message carrying a `cache_depth`.

use std::collections::VecDeque;

use crate::msg::{Msg, TS_NONE};

use super::{sort_dedup, Delivery};

/// Default number of retained entries
pub const DEFAULT_DEPTH: usize = 64;

/// Bounded log cache for `Append`/`Update` topics
#[derive(Debug)]
pub struct AppendCache {
    /// Retained entries, oldest first
    msgs: VecDeque<Msg>,
    /// Maximum number of retained entries
    depth: usize,
}

impl AppendCache {
    /// Create a cache with the default depth (64)
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_DEPTH)
    }

    /// Create a cache with the given depth
    pub fn with_depth(depth: usize) -> Self {
        Self {
            msgs: VecDeque::new(),
            depth: depth.max(1),
        }
    }

    /// Append a message and trim the log to the retention depth
    ///
    /// A replay of the newest retained entry is dropped. Out-of-order arrivals
    /// re-sort the log, keeping live entries over replayed ones at equal `ts`.
    pub fn add(&mut self, msg: Msg) {
        if msg.replay && self.msgs.back().is_some_and(|last| last.ts == msg.ts) {
            return;
        }

        if let Some(depth) = msg.cache_depth.filter(|&d| d > 0) {
            self.depth = depth;
        }

        let out_of_order = self.msgs.back().is_some_and(|last| msg.ts <= last.ts);
        self.msgs.push_back(msg);
        if out_of_order {
            let mut sorted: Vec<Msg> = self.msgs.drain(..).collect();
            sort_dedup(&mut sorted);
            self.msgs = sorted.into();
        }

        while self.msgs.len() > self.depth {
            self.msgs.pop_front();
        }
    }

    /// Catch-up batch for a subscriber joining at `ts`
    pub fn find(&mut self, ts: i64) -> Vec<Msg> {
        let in_range = self
            .ts_range()
            .is_some_and(|(first, last)| ts >= first && ts <= last);
        if in_range {
            return self.msgs.iter().filter(|m| m.ts > ts).cloned().collect();
        }
        self.current().to_vec()
    }

    /// Decision for a subscriber at `cursor` when `msg` was just added
    pub fn find_for(&self, cursor: i64, msg: &Msg) -> Delivery {
        if cursor == TS_NONE {
            return Delivery::Current;
        }
        if cursor == msg.ts {
            return Delivery::Nothing;
        }
        if msg.replay && cursor >= msg.ts {
            return Delivery::Nothing;
        }
        Delivery::Msg
    }

    /// Every retained entry, oldest first
    pub fn current(&mut self) -> &[Msg] {
        self.msgs.make_contiguous()
    }

    /// Current retention depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    /// Version range of the retained entries
    pub fn ts_range(&self) -> Option<(i64, i64)> {
        Some((self.msgs.front()?.ts, self.msgs.back()?.ts))
    }
}

impl Default for AppendCache {
    fn default() -> Self {
        Self::new()
    }
}
