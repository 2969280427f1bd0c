//! # Observer Registries
//!
//! [`Signal`] is a synchronous, in-process observer list: `subscribe` returns
//! a [`Subscription`] handle, `emit` calls every callback in registration
//! order on the emitting thread.
//!
//! A panicking callback is caught and logged; the remaining callbacks still
//! run. Callbacks must not block, and must not subscribe or unsubscribe on
//! the same signal from inside a callback. The registry lock is released
//! before delivery, so doing so will not deadlock, but the change only takes
//! effect from the next `emit`.
//!
//! ```rust
//! use core_runtime::signals::Signal;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let signal: Signal<u32> = Signal::new("example");
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! let subscription = signal.subscribe(move |value| {
//!     counter.fetch_add(*value as usize, Ordering::SeqCst);
//! });
//!
//! signal.emit(&2);
//! subscription.unsubscribe();
//! signal.emit(&5);
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::warn;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
}

/// Named observer list for values of type `T`.
pub struct Signal<T> {
    name: &'static str,
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Signal<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register `callback`. Keep the returned handle to unsubscribe later;
    /// dropping it leaves the callback registered.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            signal: self.name,
            detach: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.lock().callbacks.retain(|(cb_id, _)| *cb_id != id);
                }
            })),
        }
    }

    /// Deliver `value` to every subscriber. Returns how many callbacks
    /// completed without panicking.
    pub fn emit(&self, value: &T) -> usize {
        let snapshot: Vec<Callback<T>> = self
            .registry
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        let mut delivered = 0;
        for (position, callback) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(signal = self.name, position, "Subscriber panicked; skipping"),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().callbacks.len()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("subscribers", &self.registry.lock().callbacks.len())
            .finish()
    }
}

/// Handle returned by [`Signal::subscribe`].
pub struct Subscription {
    signal: &'static str,
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the callback. Safe to call after the signal is gone.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }

    pub fn signal_name(&self) -> &'static str {
        self.signal
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("signal", &self.signal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delivery_in_registration_order() {
        let signal: Signal<&'static str> = Signal::new("order");
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let log = log.clone();
            signal.subscribe(move |value| log.lock().push(format!("{}:{}", label, value)));
        }

        assert_eq!(signal.emit(&"x"), 3);
        assert_eq!(
            *log.lock(),
            vec!["first:x".to_string(), "second:x".to_string(), "third:x".to_string()]
        );
    }

    #[test]
    fn test_panicking_subscriber_does_not_break_delivery() {
        let signal: Signal<u32> = Signal::new("isolation");
        let hits = Arc::new(AtomicUsize::new(0));

        let before = hits.clone();
        signal.subscribe(move |_| {
            before.fetch_add(1, Ordering::SeqCst);
        });
        signal.subscribe(|_| panic!("subscriber failure"));
        let after = hits.clone();
        signal.subscribe(move |_| {
            after.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(signal.emit(&1), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Still usable afterwards.
        assert_eq!(signal.emit(&2), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_callback() {
        let signal: Signal<()> = Signal::new("unsubscribe");
        let hits = Arc::new(AtomicUsize::new(0));

        let a = hits.clone();
        let first = signal.subscribe(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = hits.clone();
        let _second = signal.subscribe(move |_| {
            b.fetch_add(10, Ordering::SeqCst);
        });

        assert_eq!(first.signal_name(), "unsubscribe");
        first.unsubscribe();
        signal.emit(&());

        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_after_signal_dropped() {
        let signal: Signal<()> = Signal::new("dropped");
        let subscription = signal.subscribe(|_| {});
        drop(signal);

        subscription.unsubscribe();
    }
}
