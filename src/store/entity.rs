//! Single-record state holder.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, ReentrantMutex};

use crate::clock::{Clock, SystemClock};
use crate::error::{into_error_value, ErrorValue, NotifyError};
use crate::notifier::{Notifier, Subscription};

/// Snapshot of an entity store.
///
/// After any completed operation `loading` and a present `error` are never
/// both set.
#[derive(Clone)]
pub struct EntityState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<ErrorValue>,
    pub last_updated: Option<SystemTime>,
}

impl<T> Default for EntityState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            last_updated: None,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityState")
            .field("data", &self.data)
            .field("loading", &self.loading)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .field("last_updated", &self.last_updated)
            .finish()
    }
}

/// Holds at most one record plus loading/error/timestamp metadata.
///
/// Every mutation replaces the state under the store's lock, releases the
/// lock, then notifies subscribers with `(current, previous)`. Mutations from
/// different threads are delivered in commit order: a writer waits until the
/// previous pass has reached every listener. A listener may still mutate the
/// store it is subscribed to.
pub struct EntityStore<T> {
    state: Mutex<EntityState<T>>,
    /// Held from commit through delivery.
    delivery: ReentrantMutex<()>,
    notifier: Notifier<EntityState<T>>,
    clock: Arc<dyn Clock>,
}

impl<T: fmt::Debug> fmt::Debug for EntityStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl<T> EntityStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(EntityState::default()),
            delivery: ReentrantMutex::new(()),
            notifier: Notifier::new(),
            clock,
        }
    }

    pub fn state(&self) -> EntityState<T> {
        self.state.lock().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.state.lock().data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn error(&self) -> Option<ErrorValue> {
        self.state.lock().error.clone()
    }

    pub fn last_updated(&self) -> Option<SystemTime> {
        self.state.lock().last_updated
    }

    /// Replace the record. Clears `loading` and `error`.
    pub fn set_data(&self, value: T) -> Result<(), NotifyError> {
        let now = self.clock.now();
        self.mutate(|state| {
            state.data = Some(value);
            state.loading = false;
            state.error = None;
            state.last_updated = Some(now);
        })
    }

    /// Edit the current record in place with `set_data` semantics.
    ///
    /// Returns `Ok(false)` without notifying when there is no record.
    pub fn update<F>(&self, f: F) -> Result<bool, NotifyError>
    where
        F: FnOnce(&mut T),
    {
        let _delivery = self.delivery.lock();
        let now = self.clock.now();
        let (current, previous) = {
            let mut state = self.state.lock();
            let Some(data) = state.data.as_ref() else {
                return Ok(false);
            };
            let previous = state.clone();
            let mut next = data.clone();
            f(&mut next);
            state.data = Some(next);
            state.loading = false;
            state.error = None;
            state.last_updated = Some(now);
            (state.clone(), previous)
        };
        self.notifier.notify(&current, &previous)?;
        Ok(true)
    }

    /// Set the loading flag. `data` and `error` are untouched.
    pub fn set_loading(&self, loading: bool) -> Result<(), NotifyError> {
        self.mutate(|state| state.loading = loading)
    }

    /// Store a caller-supplied error verbatim and clear `loading`.
    pub fn set_error<E>(&self, err: E) -> Result<(), NotifyError>
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        let err = into_error_value(err);
        self.mutate(|state| {
            state.error = Some(err);
            state.loading = false;
        })
    }

    /// Reset to the empty state.
    pub fn clear(&self) -> Result<(), NotifyError> {
        self.mutate(|state| *state = EntityState::default())
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&EntityState<T>, &EntityState<T>) + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    pub fn subscriber_count(&self) -> usize {
        self.notifier.len()
    }

    fn mutate<F>(&self, f: F) -> Result<(), NotifyError>
    where
        F: FnOnce(&mut EntityState<T>),
    {
        let _delivery = self.delivery.lock();
        let (current, previous) = {
            let mut state = self.state.lock();
            let previous = state.clone();
            f(&mut *state);
            (state.clone(), previous)
        };
        self.notifier.notify(&current, &previous)
    }
}

impl<T> Default for EntityStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
