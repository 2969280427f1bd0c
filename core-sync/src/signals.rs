//! Observer registries the orchestrator publishes to.
//!
//! Each signal delivers synchronously, in subscription order. When an
//! [`EventBus`] is attached, index, status and batch notifications are also
//! mirrored onto it for task-based consumers. Cache invalidations are not
//! mirrored: the content cache publishes its own `CacheEvent`s.

use crate::job::{BatchSummary, SyncState, SyncStatus};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, IndexEvent, SyncEvent};
use core_runtime::signals::Signal;

pub struct SyncSignals {
    pub index_changed: Signal<IndexEvent>,
    pub status_changed: Signal<SyncStatus>,
    pub cache_invalidated: Signal<CacheEvent>,
    pub batch_completed: Signal<BatchSummary>,
    event_bus: Option<EventBus>,
}

impl SyncSignals {
    pub fn new() -> Self {
        Self {
            index_changed: Signal::new("index_changed"),
            status_changed: Signal::new("status_changed"),
            cache_invalidated: Signal::new("cache_invalidated"),
            batch_completed: Signal::new("batch_completed"),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.event_bus.as_ref()
    }

    pub(crate) fn publish_index(&self, event: IndexEvent) {
        if matches!(&event, IndexEvent::Changed { fingerprints } if fingerprints.is_empty()) {
            return;
        }
        self.index_changed.emit(&event);
        self.mirror(CoreEvent::Index(event));
    }

    pub(crate) fn publish_status(&self, status: &SyncStatus) {
        self.status_changed.emit(status);

        if status.state == SyncState::Running {
            if let (Some(batch_id), Some(phase)) = (status.batch_id, status.phase.as_ref()) {
                self.mirror(CoreEvent::Sync(SyncEvent::Progress {
                    batch_id: batch_id.to_string(),
                    processed: status.processed,
                    total: status.total,
                    phase: phase.clone(),
                }));
            }
        }
    }

    pub(crate) fn publish_cache(&self, event: CacheEvent) {
        self.cache_invalidated.emit(&event);
    }

    pub(crate) fn publish_batch(&self, summary: BatchSummary) {
        self.batch_completed.emit(&summary);

        let event = if summary.cancelled {
            SyncEvent::Cancelled {
                batch_id: summary.batch_id.to_string(),
                processed: summary.succeeded + summary.skipped + summary.failed,
            }
        } else {
            SyncEvent::BatchCompleted {
                batch_id: summary.batch_id.to_string(),
                kind: summary.kind.to_string(),
                succeeded: summary.succeeded,
                skipped: summary.skipped,
                failed: summary.failed,
                duration_ms: summary.duration_ms,
            }
        };
        self.mirror(CoreEvent::Sync(event));
    }

    /// Bus-only lifecycle events that have no registry of their own.
    pub(crate) fn publish_sync_event(&self, event: SyncEvent) {
        self.mirror(CoreEvent::Sync(event));
    }

    fn mirror(&self, event: CoreEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).ok();
        }
    }
}

impl Default for SyncSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BatchId, BatchKind};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_empty_index_change_is_dropped() {
        let signals = SyncSignals::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        signals.index_changed.subscribe(move |_| *counter.lock() += 1);

        signals.publish_index(IndexEvent::Changed {
            fingerprints: Vec::new(),
        });
        signals.publish_index(IndexEvent::Wiped);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_cache_events_stay_off_the_bus() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let signals = SyncSignals::new().with_event_bus(bus);
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        signals.cache_invalidated.subscribe(move |_| *counter.lock() += 1);

        signals.publish_cache(CacheEvent::Invalidated {
            repo: "octo/photos@main".to_string(),
            fingerprints: vec!["a.jpg_1_1".to_string()],
        });

        assert_eq!(*hits.lock(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_batch_summary_is_mirrored() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let signals = SyncSignals::new().with_event_bus(bus);

        let summary = BatchSummary {
            batch_id: BatchId::new(),
            kind: BatchKind::Upload,
            succeeded: 2,
            skipped: 1,
            failed: 0,
            cancelled: false,
            duration_ms: 10,
        };
        signals.publish_batch(summary.clone());

        match rx.recv().await.unwrap() {
            CoreEvent::Sync(SyncEvent::BatchCompleted {
                kind, succeeded, ..
            }) => {
                assert_eq!(kind, "upload");
                assert_eq!(succeeded, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }

        signals.publish_batch(BatchSummary {
            cancelled: true,
            ..summary
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            CoreEvent::Sync(SyncEvent::Cancelled { processed: 3, .. })
        ));
    }
}
