//! Message types moving through the broker
//!
//! A [`Msg`] is one versioned update for one topic. The broker never looks at
//! the payload; it only uses the topic, the version (`ts`), the update type and
//! the replay flag to decide who gets what.

use std::sync::Arc;

use bytes::Bytes;

/// Cursor value of a subscriber that has never received anything
pub const TS_NONE: i64 = i64::MIN;

/// How a published message relates to the topic's existing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateType {
    /// Incremental change on top of the last full state
    Diff,
    /// Complete state of the topic
    Full,
    /// New entry appended to a bounded log
    Append,
    /// Replacement of an existing log entry
    Update,
    /// Last message of the topic; the topic is closed after it
    Close,
    /// Fire-and-forget event, never cached
    Event,
    /// Marks the start of a catch-up batch
    BurstStart,
    /// Marks the end of a catch-up batch
    BurstEnd,
}

impl UpdateType {
    /// Whether topics starting with this type are kept as a bounded log
    pub fn is_log(self) -> bool {
        matches!(self, UpdateType::Append | UpdateType::Update)
    }
}

/// A versioned, topic-addressed update
///
/// Cheap to clone: the topic is an `Arc<str>` and the payload is a
/// reference-counted `Bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    /// Topic the message belongs to
    pub topic: Arc<str>,
    /// Version of the update (timestamp or sequence number)
    pub ts: i64,
    /// How to apply the message
    pub update_type: UpdateType,
    /// Set on redelivered history, used only for duplicate suppression
    pub replay: bool,
    /// New retention depth for append topics, from this message on
    pub cache_depth: Option<usize>,
    /// Opaque payload, forwarded as is
    pub payload: Bytes,
}

impl Msg {
    /// Create a message
    pub fn new(
        topic: impl Into<Arc<str>>,
        ts: i64,
        update_type: UpdateType,
        payload: Bytes,
    ) -> Self {
        Self {
            topic: topic.into(),
            ts,
            update_type,
            replay: false,
            cache_depth: None,
            payload,
        }
    }

    /// Create a full-state message
    pub fn full(topic: impl Into<Arc<str>>, ts: i64, payload: Bytes) -> Self {
        Self::new(topic, ts, UpdateType::Full, payload)
    }

    /// Create a diff message
    pub fn diff(topic: impl Into<Arc<str>>, ts: i64, payload: Bytes) -> Self {
        Self::new(topic, ts, UpdateType::Diff, payload)
    }

    /// Create an append message
    pub fn append(topic: impl Into<Arc<str>>, ts: i64, payload: Bytes) -> Self {
        Self::new(topic, ts, UpdateType::Append, payload)
    }

    /// Create an event message
    pub fn event(topic: impl Into<Arc<str>>, ts: i64, payload: Bytes) -> Self {
        Self::new(topic, ts, UpdateType::Event, payload)
    }

    /// Create a topic close message
    pub fn close(topic: impl Into<Arc<str>>, ts: i64) -> Self {
        Self::new(topic, ts, UpdateType::Close, Bytes::new())
    }

    /// Set the append-cache retention depth carried by this message
    pub fn with_cache_depth(mut self, depth: usize) -> Self {
        self.cache_depth = Some(depth);
        self
    }

    /// Mark the message as a replay
    pub fn with_replay(mut self) -> Self {
        self.replay = true;
        self
    }

    /// Copy of this message flagged as a replay
    pub fn as_replay(&self) -> Self {
        self.clone().with_replay()
    }

    /// Burst start marker for this message's topic and version
    pub fn burst_start(&self) -> Self {
        Self::new(
            self.topic.clone(),
            self.ts,
            UpdateType::BurstStart,
            Bytes::new(),
        )
    }

    /// Burst end marker for this message's topic and version
    pub fn burst_end(&self) -> Self {
        Self::new(self.topic.clone(), self.ts, UpdateType::BurstEnd, Bytes::new())
    }

    pub fn is_full(&self) -> bool {
        self.update_type == UpdateType::Full
    }

    pub fn is_close(&self) -> bool {
        self.update_type == UpdateType::Close
    }

    pub fn is_event(&self) -> bool {
        self.update_type == UpdateType::Event
    }

    /// Whether this is a synthetic burst marker
    pub fn is_burst_marker(&self) -> bool {
        matches!(
            self.update_type,
            UpdateType::BurstStart | UpdateType::BurstEnd
        )
    }
}

/// Frame a catch-up batch with burst markers
///
/// Batches of more than two messages are wrapped in `BurstStart`/`BurstEnd`
/// so the receiver can apply them as one update. Smaller batches go out
/// unwrapped.
pub fn burst(msgs: &[Msg]) -> Vec<Msg> {
    let (Some(first), Some(last)) = (msgs.first(), msgs.last()) else {
        return Vec::new();
    };
    if msgs.len() <= 2 {
        return msgs.to_vec();
    }

    let mut framed = Vec::with_capacity(msgs.len() + 2);
    framed.push(first.burst_start());
    framed.extend_from_slice(msgs);
    framed.push(last.burst_end());
    framed
}
