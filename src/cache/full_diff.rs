//! Full/diff cache
//!
//! Keeps the last `Full` message and the diffs that arrived around it.
//! A subscriber whose cursor falls inside the diff window is brought up to
//! date with diffs only; anyone else gets the full state followed by every
//! diff newer than it.

use crate::msg::{Msg, TS_NONE};

use super::{sort_dedup, Delivery};

/// Cache for `Full`/`Diff` topics
#[derive(Debug, Default)]
pub struct FullDiffCache {
    /// Last full state
    full: Option<Msg>,
    /// Diffs sorted by `ts`, unique per `ts`
    diffs: Vec<Msg>,
    /// Memoized current state, reset on every add
    current: Option<Vec<Msg>>,
}

impl FullDiffCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a message into the cache
    ///
    /// A full replaces the previous one; diffs older than the previous full
    /// are dropped at that point so subscribers sitting between the two fulls
    /// can still be served with diffs. A replayed full never replaces live
    /// state.
    pub fn add(&mut self, msg: Msg) {
        self.current = None;

        if msg.is_full() {
            if let Some(prev) = &self.full {
                if msg.replay {
                    return;
                }
                let prev_ts = prev.ts;
                self.diffs.retain(|d| d.ts >= prev_ts);
            }
            self.full = Some(msg);
            return;
        }

        let out_of_order = self.diffs.last().is_some_and(|last| msg.ts <= last.ts);
        self.diffs.push(msg);
        if out_of_order {
            sort_dedup(&mut self.diffs);
        }
    }

    /// Catch-up batch for a subscriber joining at `ts`
    pub fn find(&mut self, ts: i64) -> Vec<Msg> {
        if self.in_diff_window(ts) {
            return self.diffs_after(ts).cloned().collect();
        }
        self.current().to_vec()
    }

    /// Decision for a subscriber at `cursor` when `msg` was just added
    pub fn find_for(&self, cursor: i64, msg: &Msg) -> Delivery {
        if msg.is_full() {
            // Subscribers with any cursor keep continuity through diffs.
            if cursor != TS_NONE {
                return Delivery::Nothing;
            }
            return Delivery::Current;
        }

        // Unset cursor: the subscriber is still waiting for a full.
        if cursor == msg.ts || cursor == TS_NONE {
            return Delivery::Nothing;
        }
        if msg.replay && cursor >= msg.ts {
            return Delivery::Nothing;
        }
        Delivery::Msg
    }

    /// Full state followed by every diff newer than it
    pub fn current(&mut self) -> &[Msg] {
        let Some(full) = self.full.as_ref() else {
            return &[];
        };
        let diffs = &self.diffs;
        self.current.get_or_insert_with(|| {
            std::iter::once(full.clone())
                .chain(diffs.iter().filter(|d| d.ts > full.ts).cloned())
                .collect()
        })
    }

    pub fn full(&self) -> Option<&Msg> {
        self.full.as_ref()
    }

    pub fn diffs(&self) -> &[Msg] {
        &self.diffs
    }

    /// Stored messages, full included
    pub fn len(&self) -> usize {
        self.diffs.len() + usize::from(self.full.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version range covered by the stored diffs
    pub fn diff_range(&self) -> Option<(i64, i64)> {
        Some((self.diffs.first()?.ts, self.diffs.last()?.ts))
    }

    fn in_diff_window(&self, ts: i64) -> bool {
        self.diff_range()
            .is_some_and(|(first, last)| ts >= first && ts <= last)
    }

    fn diffs_after(&self, ts: i64) -> impl Iterator<Item = &Msg> + '_ {
        self.diffs.iter().filter(move |d| d.ts > ts)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn full(ts: i64) -> Msg {
        Msg::full("t", ts, Bytes::new())
    }

    fn diff(ts: i64) -> Msg {
        Msg::diff("t", ts, Bytes::new())
    }

    fn ts_of(msgs: &[Msg]) -> Vec<i64> {
        msgs.iter().map(|m| m.ts).collect()
    }

    fn cache_with(msgs: Vec<Msg>) -> FullDiffCache {
        let mut cache = FullDiffCache::new();
        for msg in msgs {
            cache.add(msg);
        }
        cache
    }

    #[test]
    fn test_find_delta_and_snapshot() {
        let mut cache = cache_with(vec![full(101), diff(105), diff(107), diff(111)]);

        // Cursor inside the diff window gets only what it is missing
        assert_eq!(ts_of(&cache.find(105)), vec![107, 111]);
        assert!(cache.find(111).is_empty());

        // Out of range falls back to the snapshot
        assert_eq!(ts_of(&cache.find(1000)), vec![101, 105, 107, 111]);
        assert_eq!(ts_of(&cache.find(TS_NONE)), vec![101, 105, 107, 111]);
        assert_eq!(ts_of(&cache.find(101)), vec![101, 105, 107, 111]);
    }

    #[test]
    fn test_find_reaches_current_from_any_cursor() {
        let mut cache = cache_with(vec![
            full(10),
            diff(11),
            diff(13),
            diff(12),
            full(14),
            diff(15),
            diff(16),
        ]);
        let current = ts_of(cache.current());
        let last = *current.last().unwrap();

        for cursor in [TS_NONE, 0, 9, 11, 12, 13, 14, 15, 16, 17, 500] {
            let batch = cache.find(cursor);
            if batch.first().is_some_and(|m| m.is_full()) {
                assert_eq!(ts_of(&batch), current, "cursor {cursor}");
            } else {
                // Pure delta: strictly increasing, ends where current ends
                let ts = ts_of(&batch);
                assert!(ts.windows(2).all(|w| w[0] < w[1]));
                assert!(ts.iter().all(|&t| t > cursor));
                if let Some(&end) = ts.last() {
                    assert_eq!(end, last);
                }
            }
        }
    }

    #[test]
    fn test_find_without_full_is_empty() {
        let mut cache = cache_with(vec![diff(10), diff(11), diff(12), diff(13)]);

        assert!(cache.find(TS_NONE).is_empty());
        assert!(cache.current().is_empty());
        // The diff window still serves subscribers that already have a base
        assert_eq!(ts_of(&cache.find(11)), vec![12, 13]);
    }

    #[test]
    fn test_add_keeps_diffs_after_previous_full() {
        let mut cache = cache_with(vec![full(10), diff(11), diff(12), diff(15)]);
        assert_eq!(cache.diffs().len(), 3);

        cache.add(full(15));
        assert_eq!(cache.diffs().len(), 3);
        assert_eq!(ts_of(cache.current()), vec![15]);

        cache.add(diff(14));
        assert_eq!(ts_of(cache.diffs()), vec![11, 12, 14, 15]);

        // Second full prunes everything older than the previous one (15)
        cache.add(full(20));
        assert_eq!(ts_of(cache.diffs()), vec![15]);
    }

    #[test]
    fn test_add_ignores_replayed_full_over_live_state() {
        let mut cache = cache_with(vec![full(10), diff(11)]);

        cache.add(full(12).with_replay());

        assert_eq!(cache.full().map(|m| m.ts), Some(10));
        assert_eq!(ts_of(cache.current()), vec![10, 11]);
    }

    #[test]
    fn test_add_accepts_replayed_full_when_empty() {
        let mut cache = FullDiffCache::new();
        cache.add(full(12).with_replay());

        assert_eq!(cache.full().map(|m| m.ts), Some(12));
    }

    #[test]
    fn test_add_dedups_equal_ts_live_wins() {
        let mut cache = cache_with(vec![full(10), diff(12), diff(15).with_replay()]);

        cache.add(diff(15));
        cache.add(diff(12).with_replay());

        assert_eq!(ts_of(cache.diffs()), vec![12, 15]);
        assert!(cache.diffs().iter().all(|d| !d.replay));
    }

    #[test]
    fn test_out_of_order_diff_before_full_is_discarded() {
        let mut cache = cache_with(vec![diff(109), full(110), diff(111)]);

        assert_eq!(ts_of(cache.current()), vec![110, 111]);
        assert!(cache.current()[0].is_full());
    }

    #[test]
    fn test_current_memoized_and_invalidated() {
        let mut cache = cache_with(vec![full(1), diff(2)]);
        assert_eq!(cache.current().len(), 2);

        cache.add(diff(3));
        assert_eq!(ts_of(cache.current()), vec![1, 2, 3]);
    }

    #[test]
    fn test_find_for_full() {
        let cache = FullDiffCache::new();
        let msg = full(20);

        assert_eq!(cache.find_for(TS_NONE, &msg), Delivery::Current);
        assert_eq!(cache.find_for(5, &msg), Delivery::Nothing);
        assert_eq!(cache.find_for(20, &msg), Delivery::Nothing);
    }

    #[test]
    fn test_find_for_diff() {
        let cache = FullDiffCache::new();

        assert_eq!(cache.find_for(TS_NONE, &diff(20)), Delivery::Nothing);
        assert_eq!(cache.find_for(20, &diff(20)), Delivery::Nothing);
        assert_eq!(cache.find_for(19, &diff(20)), Delivery::Msg);
        // Live diffs go out even if they look old
        assert_eq!(cache.find_for(25, &diff(20)), Delivery::Msg);

        let replayed = diff(20).with_replay();
        assert_eq!(cache.find_for(25, &replayed), Delivery::Nothing);
        assert_eq!(cache.find_for(19, &replayed), Delivery::Msg);
    }

    #[test]
    fn test_len_counts_full() {
        let mut cache = FullDiffCache::new();
        assert!(cache.is_empty());

        cache.add(diff(1));
        cache.add(full(2));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.diff_range(), Some((1, 1)));
    }
}
