//! Correlation cache: source message → mirrored message.
//!
//! The cache is the only state shared by the two platform listeners. It answers
//! two questions:
//! - has this source message already been accepted for relay? (loop/duplicate guard)
//! - which message on the other platform mirrors this one? (reaction routing)
//!
//! Entries are created before the outbound send starts, filled in once with the
//! mirror reference, and dropped after the retention window. Expired entries are
//! swept on every access instead of on a timer.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::domain::MessageRef;

/// How long a correlation stays resolvable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Proof that a relay attempt was registered; needed to attach the mirror later.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayHandle {
    source: MessageRef,
    ticket: u64,
}

impl RelayHandle {
    pub fn source(&self) -> &MessageRef {
        &self.source
    }
}

/// Result of [`CorrelationCache::record_outbound`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    /// First sighting: the caller owns the relay.
    New(RelayHandle),
    /// Someone already registered this source; the caller must not send.
    Duplicate(RelayHandle),
}

impl Registration {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Registration::Duplicate(_))
    }

    pub fn handle(&self) -> &RelayHandle {
        match self {
            Registration::New(h) | Registration::Duplicate(h) => h,
        }
    }

    pub fn into_handle(self) -> RelayHandle {
        match self {
            Registration::New(h) | Registration::Duplicate(h) => h,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CorrelationEntry {
    pub source: MessageRef,
    pub mirror: Option<MessageRef>,
    pub created_at: Instant,
    ticket: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<MessageRef, CorrelationEntry>,
    /// mirror → source, for reactions placed on the mirrored copy.
    reverse: HashMap<MessageRef, MessageRef>,
    next_ticket: u64,
}

impl CacheState {
    fn evict_expired(&mut self, now: Instant, retention: Duration) -> usize {
        let before = self.entries.len();
        let reverse = &mut self.reverse;
        self.entries.retain(|_, entry| {
            let keep = now.saturating_duration_since(entry.created_at) <= retention;
            if !keep {
                if let Some(mirror) = &entry.mirror {
                    if reverse.get(mirror) == Some(&entry.source) {
                        reverse.remove(mirror);
                    }
                }
            }
            keep
        });
        before - self.entries.len()
    }
}

/// In-process correlation store with time-based eviction.
///
/// All mutations happen under a short synchronous lock that is never held
/// across an `.await`, so check-and-insert is atomic for concurrent listeners.
#[derive(Debug)]
pub struct CorrelationCache {
    retention: Duration,
    state: Mutex<CacheState>,
}

impl Default for CorrelationCache {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl CorrelationCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // The state stays consistent even if a holder panicked mid-sweep.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep(&self, now: Instant) -> MutexGuard<'_, CacheState> {
        let mut st = self.lock();
        let evicted = st.evict_expired(now, self.retention);
        if evicted > 0 {
            tracing::debug!(evicted, remaining = st.entries.len(), "correlation sweep");
        }
        st
    }

    pub fn record_outbound(&self, source: &MessageRef) -> Registration {
        self.record_outbound_at(source, Instant::now())
    }

    /// Register a relay attempt for `source`, or report that one already exists.
    pub fn record_outbound_at(&self, source: &MessageRef, now: Instant) -> Registration {
        let mut st = self.sweep(now);

        if let Some(existing) = st.entries.get(source) {
            return Registration::Duplicate(RelayHandle {
                source: source.clone(),
                ticket: existing.ticket,
            });
        }

        st.next_ticket += 1;
        let ticket = st.next_ticket;
        st.entries.insert(
            source.clone(),
            CorrelationEntry {
                source: source.clone(),
                mirror: None,
                created_at: now,
                ticket,
            },
        );
        Registration::New(RelayHandle {
            source: source.clone(),
            ticket,
        })
    }

    pub fn attach_mirror_reference(&self, handle: &RelayHandle, mirror: MessageRef) -> bool {
        self.attach_mirror_reference_at(handle, mirror, Instant::now())
    }

    /// Store the mirror for a registered source.
    ///
    /// Returns `false` (and only logs) when the entry was evicted, re-created
    /// under a new ticket, or already has a mirror.
    pub fn attach_mirror_reference_at(
        &self,
        handle: &RelayHandle,
        mirror: MessageRef,
        now: Instant,
    ) -> bool {
        let mut st = self.sweep(now);

        let Some(entry) = st.entries.get_mut(&handle.source) else {
            tracing::info!(source = %handle.source, "correlation expired before mirror was attached");
            return false;
        };
        if entry.ticket != handle.ticket {
            tracing::info!(source = %handle.source, "stale relay handle; correlation was re-created");
            return false;
        }
        if let Some(existing) = &entry.mirror {
            tracing::warn!(
                source = %handle.source,
                existing = %existing,
                rejected = %mirror,
                "correlation already has a mirror reference"
            );
            return false;
        }
        entry.mirror = Some(mirror.clone());

        if let Some(previous) = st.reverse.insert(mirror.clone(), handle.source.clone()) {
            if previous != handle.source {
                tracing::warn!(
                    mirror = %mirror,
                    previous = %previous,
                    source = %handle.source,
                    "two sources share one mirror reference; keeping the latest"
                );
            }
        }
        true
    }

    pub fn lookup_mirror_reference(&self, source: &MessageRef) -> Option<MessageRef> {
        self.lookup_mirror_reference_at(source, Instant::now())
    }

    pub fn lookup_mirror_reference_at(
        &self,
        source: &MessageRef,
        now: Instant,
    ) -> Option<MessageRef> {
        let st = self.sweep(now);
        st.entries.get(source).and_then(|e| e.mirror.clone())
    }

    pub fn lookup_counterpart(&self, msg: &MessageRef) -> Option<MessageRef> {
        self.lookup_counterpart_at(msg, Instant::now())
    }

    /// The other side of a correlation: the mirror of a source, or the source of a mirror.
    pub fn lookup_counterpart_at(&self, msg: &MessageRef, now: Instant) -> Option<MessageRef> {
        let st = self.sweep(now);
        if let Some(mirror) = st.entries.get(msg).and_then(|e| e.mirror.clone()) {
            return Some(mirror);
        }
        st.reverse.get(msg).cloned()
    }

    pub fn evict_expired(&self, now: Instant) -> usize {
        self.lock().evict_expired(now, self.retention)
    }

    /// Number of tracked correlations (including ones still waiting for a mirror).
    pub fn len(&self) -> usize {
        self.len_at(Instant::now())
    }

    pub fn len_at(&self, now: Instant) -> usize {
        self.sweep(now).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::domain::Platform;

    fn discord(id: &str) -> MessageRef {
        MessageRef::new(Platform::Discord, "D1", id)
    }

    fn slack(ts: &str) -> MessageRef {
        MessageRef::new(Platform::Slack, "C1", ts)
    }

    const MIN: Duration = Duration::from_secs(60);

    #[test]
    fn second_registration_is_duplicate() {
        let cache = CorrelationCache::default();
        let first = cache.record_outbound(&discord("42"));
        let second = cache.record_outbound(&discord("42"));

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.handle(), second.handle());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn same_id_on_different_platforms_is_not_a_duplicate() {
        let cache = CorrelationCache::default();
        let a = MessageRef::new(Platform::Discord, "X", "1");
        let b = MessageRef::new(Platform::Slack, "X", "1");
        assert!(!cache.record_outbound(&a).is_duplicate());
        assert!(!cache.record_outbound(&b).is_duplicate());
    }

    #[test]
    fn mirror_is_resolvable_within_retention_and_gone_after() {
        let t0 = Instant::now();
        let cache = CorrelationCache::new(5 * MIN);

        let handle = cache.record_outbound_at(&discord("42"), t0).into_handle();
        assert!(cache.attach_mirror_reference_at(&handle, slack("1700000000.000100"), t0));

        assert_eq!(
            cache.lookup_mirror_reference_at(&discord("42"), t0 + 4 * MIN),
            Some(slack("1700000000.000100"))
        );
        assert_eq!(cache.lookup_mirror_reference_at(&discord("42"), t0 + 6 * MIN), None);
        assert_eq!(cache.len_at(t0 + 6 * MIN), 0);
    }

    #[test]
    fn counterpart_resolves_both_directions() {
        let cache = CorrelationCache::default();
        let handle = cache.record_outbound(&slack("1.0")).into_handle();
        cache.attach_mirror_reference(&handle, discord("900"));

        assert_eq!(cache.lookup_counterpart(&slack("1.0")), Some(discord("900")));
        assert_eq!(cache.lookup_counterpart(&discord("900")), Some(slack("1.0")));
        assert_eq!(cache.lookup_mirror_reference(&discord("900")), None);
    }

    #[test]
    fn pending_entry_has_no_mirror() {
        let cache = CorrelationCache::default();
        cache.record_outbound(&discord("7"));
        assert_eq!(cache.lookup_mirror_reference(&discord("7")), None);
        assert_eq!(cache.lookup_counterpart(&discord("7")), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn attach_after_eviction_is_a_silent_no_op() {
        let t0 = Instant::now();
        let cache = CorrelationCache::new(5 * MIN);
        let handle = cache.record_outbound_at(&discord("42"), t0).into_handle();

        assert!(!cache.attach_mirror_reference_at(&handle, slack("2.0"), t0 + 10 * MIN));
        assert_eq!(cache.lookup_counterpart_at(&slack("2.0"), t0 + 10 * MIN), None);
    }

    #[test]
    fn stale_handle_cannot_attach_to_recreated_entry() {
        let t0 = Instant::now();
        let cache = CorrelationCache::new(5 * MIN);
        let old = cache.record_outbound_at(&discord("42"), t0).into_handle();
        let fresh = cache
            .record_outbound_at(&discord("42"), t0 + 6 * MIN)
            .into_handle();
        assert_ne!(old, fresh);

        assert!(!cache.attach_mirror_reference_at(&old, slack("1.0"), t0 + 6 * MIN));
        assert!(cache.attach_mirror_reference_at(&fresh, slack("2.0"), t0 + 6 * MIN));
    }

    #[test]
    fn mirror_reference_is_set_once() {
        let cache = CorrelationCache::default();
        let handle = cache.record_outbound(&discord("1")).into_handle();
        assert!(cache.attach_mirror_reference(&handle, slack("1.0")));
        assert!(!cache.attach_mirror_reference(&handle, slack("2.0")));
        assert_eq!(cache.lookup_mirror_reference(&discord("1")), Some(slack("1.0")));
    }

    #[test]
    fn shared_mirror_keeps_latest_source() {
        let cache = CorrelationCache::default();
        let a = cache.record_outbound(&discord("1")).into_handle();
        let b = cache.record_outbound(&discord("2")).into_handle();
        cache.attach_mirror_reference(&a, slack("9.0"));
        cache.attach_mirror_reference(&b, slack("9.0"));

        assert_eq!(cache.lookup_counterpart(&slack("9.0")), Some(discord("2")));
    }

    #[test]
    fn evicting_an_overwritten_source_keeps_the_newer_reverse_link() {
        let t0 = Instant::now();
        let cache = CorrelationCache::new(5 * MIN);
        let a = cache.record_outbound_at(&discord("1"), t0).into_handle();
        cache.attach_mirror_reference_at(&a, slack("9.0"), t0);
        let b = cache
            .record_outbound_at(&discord("2"), t0 + 3 * MIN)
            .into_handle();
        cache.attach_mirror_reference_at(&b, slack("9.0"), t0 + 3 * MIN);

        assert_eq!(cache.evict_expired(t0 + 6 * MIN), 1);
        assert_eq!(
            cache.lookup_counterpart_at(&slack("9.0"), t0 + 6 * MIN),
            Some(discord("2"))
        );
    }

    #[test]
    fn concurrent_registrations_admit_exactly_one() {
        let cache = Arc::new(CorrelationCache::default());
        let threads: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.record_outbound(&discord("42")).is_duplicate())
            })
            .collect();

        let new_count = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|dup| !dup)
            .count();
        assert_eq!(new_count, 1);
    }

    proptest! {
        #[test]
        fn exactly_one_new_registration_per_source(ids in proptest::collection::vec(0u8..8, 1..64)) {
            let cache = CorrelationCache::default();
            let mut new_per_id = [0usize; 8];
            for id in &ids {
                let reg = cache.record_outbound(&discord(&id.to_string()));
                if !reg.is_duplicate() {
                    new_per_id[*id as usize] += 1;
                }
            }
            for id in 0u8..8 {
                let expected = usize::from(ids.contains(&id));
                prop_assert_eq!(new_per_id[id as usize], expected);
            }
        }
    }
}
