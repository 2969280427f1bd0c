//! # Event Bus System
//!
//! Async, broadcast-based event stream for consumers that live in their own
//! tasks (UI bridges, loggers, background prefetchers).
//!
//! ## Overview
//!
//! - **Event Types**: a [`CoreEvent`] wrapping one enum per domain
//! - **EventBus**: `tokio::sync::broadcast` sender shared behind `Arc`
//! - **EventStream**: receiver wrapper with an optional filter
//!
//! Synchronous, in-process callbacks use the observer registries in
//! [`crate::signals`] instead. The sync orchestrator publishes to both: every
//! signal it fires is mirrored here when a bus is attached.
//!
//! ```text
//! ┌──────────────┐   emit    ┌───────────┐  subscribe  ┌────────────┐
//! │ Orchestrator ├──────────>│ EventBus  ├────────────>│ UI bridge  │
//! └──────────────┘           │(broadcast)│             └────────────┘
//! ┌──────────────┐   emit    │           │  subscribe  ┌────────────┐
//! │ ContentCache ├──────────>│           ├────────────>│ Telemetry  │
//! └──────────────┘           └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::BatchStarted {
//!     batch_id: "b-1".to_string(),
//!     kind: "upload".to_string(),
//!     total: 3,
//! }))
//! .ok();
//!
//! assert!(matches!(rx.recv().await, Ok(CoreEvent::Sync(_))));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the receiver fell `n` events behind; keep reading.
//! - **`RecvError::Closed`**: every sender is gone; treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed. Publishers ignore that with
//! `.ok()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default per-subscriber buffer.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Sync(SyncEvent),
    Index(IndexEvent),
    Cache(CacheEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Index(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::AssetFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::BatchCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Info,
            CoreEvent::Index(IndexEvent::Wiped) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Batch lifecycle of the sync orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    BatchStarted {
        batch_id: String,
        /// `upload`, `delete`, `download`, `reconcile` or `reset`.
        kind: String,
        total: u64,
    },
    Progress {
        batch_id: String,
        processed: u64,
        total: u64,
        phase: String,
    },
    /// A single asset failed; the batch continues.
    AssetFailed {
        batch_id: String,
        fingerprint: String,
        message: String,
    },
    BatchCompleted {
        batch_id: String,
        kind: String,
        succeeded: u64,
        skipped: u64,
        failed: u64,
        duration_ms: u64,
    },
    Cancelled {
        batch_id: String,
        processed: u64,
    },
    /// The batch aborted before touching the remote.
    Failed {
        batch_id: String,
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::BatchStarted { .. } => "Sync batch started",
            SyncEvent::Progress { .. } => "Sync batch in progress",
            SyncEvent::AssetFailed { .. } => "Asset failed during sync",
            SyncEvent::BatchCompleted { .. } => "Sync batch completed",
            SyncEvent::Cancelled { .. } => "Sync batch cancelled",
            SyncEvent::Failed { .. } => "Sync batch failed",
        }
    }
}

// ============================================================================
// Index Events
// ============================================================================

/// Changes to the local durable index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum IndexEvent {
    Changed { fingerprints: Vec<String> },
    Wiped,
}

impl IndexEvent {
    fn description(&self) -> &str {
        match self {
            IndexEvent::Changed { .. } => "Local index changed",
            IndexEvent::Wiped => "Local index wiped",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Cached content for these fingerprints must no longer be shown.
    Invalidated {
        repo: String,
        fingerprints: Vec<String>,
    },
    Evicted {
        repo: String,
        entries: u64,
        bytes_freed: u64,
    },
    Cleared {
        repo: String,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Invalidated { .. } => "Cache entries invalidated",
            CacheEvent::Evicted { .. } => "Cache entries evicted",
            CacheEvent::Cleared { .. } => "Cache cleared",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast hub. Clone freely; clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer before `Lagged` is reported.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Returns the number of receivers reached, or an error when there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// New receiver for events emitted from now on.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let cache_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Cache(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Next event passing the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant; `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn invalidated(fp: &str) -> CoreEvent {
        CoreEvent::Cache(CacheEvent::Invalidated {
            repo: "octo/photos/main".to_string(),
            fingerprints: vec![fp.to_string()],
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(CoreEvent::Index(IndexEvent::Wiped)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Sync(SyncEvent::BatchStarted {
            batch_id: "b-1".to_string(),
            kind: "upload".to_string(),
            total: 3,
        });
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_filter_skips_other_domains() {
        let bus = EventBus::new(10);
        let mut stream =
            EventStream::new(bus.subscribe()).filter(|e| matches!(e, CoreEvent::Cache(_)));

        bus.emit(CoreEvent::Index(IndexEvent::Changed {
            fingerprints: vec!["a".to_string()],
        }))
        .ok();
        bus.emit(invalidated("a")).ok();

        assert_eq!(stream.recv().await.unwrap(), invalidated("a"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut stream = EventStream::new(bus.subscribe());

        for i in 0..5 {
            bus.emit(invalidated(&i.to_string())).ok();
        }

        assert!(matches!(stream.try_recv(), Some(Err(RecvError::Lagged(_)))));
        assert!(matches!(stream.try_recv(), Some(Ok(_))));
    }

    #[test]
    fn test_severity_and_description() {
        let failed = CoreEvent::Sync(SyncEvent::Failed {
            batch_id: "b".to_string(),
            message: "permission denied".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(failed.description(), "Sync batch failed");
        assert_eq!(invalidated("x").severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_serialization_shape() {
        let json = serde_json::to_value(invalidated("fp-1")).unwrap();

        assert_eq!(json["type"], "Cache");
        assert_eq!(json["payload"]["event"], "Invalidated");
        assert_eq!(json["payload"]["fingerprints"][0], "fp-1");
    }
}
