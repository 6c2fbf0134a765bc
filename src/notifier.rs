//! Synchronous publish/subscribe primitive.
//!
//! A [`Notifier`] delivers `(current, previous)` pairs to every registered
//! listener, in registration order, on the calling thread. Delivery works on
//! a snapshot of the listener list taken when the pass starts:
//!
//! - a listener added during a pass is not called in that pass;
//! - a listener removed during a pass is skipped if not yet reached.
//!
//! A listener that panics does not stop delivery. The panic is caught and
//! logged, the remaining listeners run, and the first failure is returned to
//! the caller of [`Notifier::notify`] once the pass completes.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::NotifyError;

/// Callback invoked with `(current, previous)` on every change.
pub type Listener<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

/// Identifier of one registration, unique within its notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Entry<T: ?Sized> {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    listener: Listener<T>,
}

impl<T: ?Sized> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            listener: Arc::clone(&self.listener),
        }
    }
}

struct Listeners<T: ?Sized> {
    entries: Mutex<Vec<Entry<T>>>,
}

/// Type-erased removal hook so [`Subscription`] does not carry `T`.
trait Detach: Send + Sync {
    fn detach(&self, id: SubscriptionId);
}

impl<T: ?Sized> Detach for Listeners<T> {
    fn detach(&self, id: SubscriptionId) {
        self.entries.lock().retain(|entry| entry.id != id);
    }
}

/// Ordered listener registry with snapshot delivery.
pub struct Notifier<T: ?Sized> {
    listeners: Arc<Listeners<T>>,
    next_id: AtomicU64,
}

impl<T: ?Sized + 'static> Notifier<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Listeners {
                entries: Mutex::new(Vec::new()),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is unsubscribed or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let active = Arc::new(AtomicBool::new(true));
        self.listeners.entries.lock().push(Entry {
            id,
            active: Arc::clone(&active),
            listener: Arc::new(listener),
        });

        let weak: Weak<Listeners<T>> = Arc::downgrade(&self.listeners);
        let registry: Weak<dyn Detach> = weak;
        Subscription {
            id,
            active,
            registry,
            detached: false,
        }
    }

    /// Deliver `(current, previous)` to every listener registered when the
    /// pass starts.
    ///
    /// The listener lock is not held while callbacks run, so listeners may
    /// read the owning store, subscribe, or unsubscribe.
    pub fn notify(&self, current: &T, previous: &T) -> Result<(), NotifyError> {
        let snapshot: Vec<Entry<T>> = self.listeners.entries.lock().clone();
        tracing::trace!(listeners = snapshot.len(), "notify");

        let mut first: Option<(SubscriptionId, String)> = None;
        let mut failed = 0usize;

        for entry in snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            let listener = &entry.listener;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(current, previous)));
            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                tracing::error!(subscription = %entry.id, %message, "state listener panicked");
                failed += 1;
                first.get_or_insert((entry.id, message));
            }
        }

        match first {
            None => Ok(()),
            Some((subscription, message)) => Err(NotifyError::ListenerPanicked {
                subscription,
                message,
                failed,
            }),
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener. Outstanding [`Subscription`]s become inactive.
    pub fn clear(&self) {
        let drained: Vec<Entry<T>> = std::mem::take(&mut *self.listeners.entries.lock());
        for entry in drained {
            entry.active.store(false, Ordering::Release);
        }
    }
}

impl<T: ?Sized + 'static> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle for one listener registration.
///
/// Dropping the handle unsubscribes. Use [`Subscription::detach`] to keep the
/// listener for the lifetime of the notifier instead.
#[must_use = "dropping a Subscription immediately unsubscribes its listener"]
pub struct Subscription {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    registry: Weak<dyn Detach>,
    detached: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }

    /// Keep the listener registered after this handle is dropped.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
