//! Lifecycle events and counters for prefetch entries.
//!
//! Every state transition the registry performs is published as a
//! [`PrefetchEvent`] on a broadcast channel and counted in [`PrefetchStats`].
//! Publishing never blocks: slow subscribers lag and lose events.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::key::PrefetchKey;
use crate::policy::{Priority, Reason};

/// A state transition of one prefetch entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchEvent {
    /// A new entry is pending.
    Scheduled {
        key: PrefetchKey,
        reason: Reason,
        priority: Priority,
        delay_ms: u64,
    },
    /// A pending entry was superseded by a newer trigger for the same key.
    Replaced { key: PrefetchKey },
    /// The debounce timer elapsed.
    Fired { key: PrefetchKey },
    /// Fresh data was already cached; no request was made.
    Skipped { key: PrefetchKey },
    /// A request was handed to the catalog client.
    Dispatched { key: PrefetchKey },
    /// The request completed. `ok` is `false` when the client failed.
    Settled { key: PrefetchKey, ok: bool },
    /// The entry was cancelled before settling.
    Cancelled { key: PrefetchKey },
}

impl PrefetchEvent {
    pub fn key(&self) -> &PrefetchKey {
        match self {
            Self::Scheduled { key, .. }
            | Self::Replaced { key }
            | Self::Fired { key }
            | Self::Skipped { key }
            | Self::Dispatched { key }
            | Self::Settled { key, .. }
            | Self::Cancelled { key } => key,
        }
    }
}

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchStats {
    pub scheduled: u64,
    pub replaced: u64,
    pub fired: u64,
    pub skipped: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    replaced: AtomicU64,
    fired: AtomicU64,
    skipped: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Fan-out point for events plus the running counters.
#[derive(Debug)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<PrefetchEvent>,
    counters: Counters,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            counters: Counters::default(),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PrefetchEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: PrefetchEvent) {
        let counter = match &event {
            PrefetchEvent::Scheduled { .. } => &self.counters.scheduled,
            PrefetchEvent::Replaced { .. } => &self.counters.replaced,
            PrefetchEvent::Fired { .. } => &self.counters.fired,
            PrefetchEvent::Skipped { .. } => &self.counters.skipped,
            PrefetchEvent::Dispatched { .. } => &self.counters.dispatched,
            PrefetchEvent::Settled { ok: true, .. } => &self.counters.succeeded,
            PrefetchEvent::Settled { ok: false, .. } => &self.counters.failed,
            PrefetchEvent::Cancelled { .. } => &self.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub(crate) fn stats(&self) -> PrefetchStats {
        let c = &self.counters;
        PrefetchStats {
            scheduled: c.scheduled.load(Ordering::Relaxed),
            replaced: c.replaced.load(Ordering::Relaxed),
            fired: c.fired.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::PrefetchTarget;

    #[test]
    fn emit_counts_without_subscribers() {
        let bus = EventBus::new(8);
        let key = PrefetchTarget::product("abc").key();
        bus.emit(PrefetchEvent::Fired { key: key.clone() });
        bus.emit(PrefetchEvent::Settled {
            key: key.clone(),
            ok: false,
        });
        let stats = bus.stats();
        assert_eq!(stats.fired, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let key = PrefetchTarget::product("abc").key();
        bus.emit(PrefetchEvent::Cancelled { key: key.clone() });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.key(), &key);
        assert!(matches!(event, PrefetchEvent::Cancelled { .. }));
    }

    #[test]
    fn stats_serialize() {
        let json = serde_json::to_value(PrefetchStats::default()).unwrap();
        assert_eq!(json["dispatched"], 0);
    }
}
