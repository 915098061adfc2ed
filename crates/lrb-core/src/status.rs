//! Relay counters and the periodic status report.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::relay::{RelayEngine, RelayOutcome};

#[derive(Debug)]
pub struct RelayStats {
    started: Instant,
    relayed: AtomicU64,
    failed: AtomicU64,
    filtered: AtomicU64,
    reactions_synced: AtomicU64,
    reactions_dropped: AtomicU64,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            relayed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            reactions_synced: AtomicU64::new(0),
            reactions_dropped: AtomicU64::new(0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayCounters {
    pub relayed: u64,
    pub failed: u64,
    pub filtered: u64,
    pub reactions_synced: u64,
    pub reactions_dropped: u64,
}

impl RelayStats {
    pub fn observe(&self, outcome: &RelayOutcome) {
        let counter = match outcome {
            RelayOutcome::FilteredOut(_) => &self.filtered,
            RelayOutcome::Correlated { .. } => &self.relayed,
            RelayOutcome::DispatchFailed { .. } => &self.failed,
            RelayOutcome::ReactionSynced { .. } => &self.reactions_synced,
            RelayOutcome::ReactionDropped(_) => &self.reactions_dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> RelayCounters {
        RelayCounters {
            relayed: self.relayed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            reactions_synced: self.reactions_synced.load(Ordering::Relaxed),
            reactions_dropped: self.reactions_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub uptime: Duration,
    pub tracked_correlations: usize,
    pub counters: RelayCounters,
}

impl StatusSnapshot {
    pub fn capture(engine: &RelayEngine) -> Self {
        Self {
            uptime: engine.stats().uptime(),
            tracked_correlations: engine.cache().len(),
            counters: engine.stats().counters(),
        }
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f, "Relay statistics")?;
        writeln!(f, "Uptime: {:.1}h", self.uptime.as_secs_f64() / 3600.0)?;
        writeln!(f, "Tracked messages: {}", self.tracked_correlations)?;
        writeln!(f, "Relayed: {} (failed {}, filtered {})", c.relayed, c.failed, c.filtered)?;
        write!(
            f,
            "Reactions: {} synced, {} dropped",
            c.reactions_synced, c.reactions_dropped
        )
    }
}

/// Log a [`StatusSnapshot`] every `interval` until `cancel` fires.
pub fn spawn_status_task(
    engine: Arc<RelayEngine>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        tick.tick().await;
        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                let snap = StatusSnapshot::capture(&engine);
                tracing::info!(
                    uptime_secs = snap.uptime.as_secs(),
                    tracked = snap.tracked_correlations,
                    relayed = snap.counters.relayed,
                    failed = snap.counters.failed,
                    filtered = snap.counters.filtered,
                    reactions_synced = snap.counters.reactions_synced,
                    reactions_dropped = snap.counters.reactions_dropped,
                    "relay status"
                );
              }
            }
        }
        tracing::debug!("status task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{MessageRef, Platform},
        relay::{filter::FilterReason, RelayError},
    };

    #[test]
    fn outcomes_land_in_their_counters() {
        let stats = RelayStats::default();
        let src = MessageRef::new(Platform::Slack, "C1", "1.0");
        stats.observe(&RelayOutcome::FilteredOut(FilterReason::Duplicate));
        stats.observe(&RelayOutcome::FilteredOut(FilterReason::BotOrigin));
        stats.observe(&RelayOutcome::DispatchFailed {
            source: src.clone(),
            error: RelayError::Transient("boom".to_string()),
        });
        stats.observe(&RelayOutcome::ReactionDropped(RelayError::CorrelationMiss(src)));

        assert_eq!(
            stats.counters(),
            RelayCounters {
                relayed: 0,
                failed: 1,
                filtered: 2,
                reactions_synced: 0,
                reactions_dropped: 1,
            }
        );
    }

    #[test]
    fn snapshot_renders_counters() {
        let snap = StatusSnapshot {
            uptime: Duration::from_secs(5400),
            tracked_correlations: 3,
            counters: RelayCounters {
                relayed: 7,
                ..Default::default()
            },
        };
        let text = snap.to_string();
        assert!(text.contains("Uptime: 1.5h"));
        assert!(text.contains("Tracked messages: 3"));
        assert!(text.contains("Relayed: 7 (failed 0, filtered 0)"));
    }
}
