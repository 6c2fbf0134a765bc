//! Normalized multi-record state holder.
//!
//! Records live in an id → record map plus an ordered id list. The list keeps
//! first-seen order: updating an existing id never moves it, new ids are
//! appended, removals keep the relative order of what remains.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, ReentrantMutex};

use crate::clock::{Clock, SystemClock};
use crate::error::{into_error_value, ErrorValue, NotifyError};
use crate::notifier::{Notifier, Subscription};

/// Extracts the identifier of a record.
pub type IdFn<T, Id> = Arc<dyn Fn(&T) -> Id + Send + Sync>;

/// Metadata snapshot of a collection store.
#[derive(Clone)]
pub struct CollectionMeta {
    pub loading: bool,
    pub error: Option<ErrorValue>,
    pub last_updated: Option<SystemTime>,
    pub count: usize,
}

impl fmt::Debug for CollectionMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionMeta")
            .field("loading", &self.loading)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .field("last_updated", &self.last_updated)
            .field("count", &self.count)
            .finish()
    }
}

struct Inner<T, Id> {
    by_id: HashMap<Id, T>,
    ids: Vec<Id>,
    loading: bool,
    error: Option<ErrorValue>,
    last_updated: Option<SystemTime>,
    /// Materialized `ids → by_id` sequence, dropped on every mutation.
    view: Option<Arc<[T]>>,
}

impl<T: Clone, Id: Eq + Hash> Inner<T, Id> {
    fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            ids: Vec::new(),
            loading: false,
            error: None,
            last_updated: None,
            view: None,
        }
    }

    fn view(&mut self) -> Arc<[T]> {
        if let Some(view) = &self.view {
            return Arc::clone(view);
        }
        let by_id = &self.by_id;
        let items: Arc<[T]> = self
            .ids
            .iter()
            .filter_map(|id| by_id.get(id).cloned())
            .collect();
        self.view = Some(Arc::clone(&items));
        items
    }

    /// Insert or replace one record. Returns true when the id was new.
    fn upsert(&mut self, id: Id, item: T) -> bool
    where
        Id: Clone,
    {
        let is_new = self.by_id.insert(id.clone(), item).is_none();
        if is_new {
            self.ids.push(id);
        }
        is_new
    }

    fn clear_items(&mut self) {
        self.by_id.clear();
        self.ids.clear();
    }
}

/// Holds a normalized set of records keyed by an identifier.
///
/// Subscribers receive the ordered record sequence (as returned by
/// [`CollectionStore::get_all`]), never the internal map. Batch operations
/// notify exactly once, and passes from different threads arrive in commit
/// order. With no subscribers, mutations never materialize the sequence.
pub struct CollectionStore<T, Id> {
    inner: Mutex<Inner<T, Id>>,
    /// Held from commit through delivery.
    delivery: ReentrantMutex<()>,
    notifier: Notifier<[T]>,
    id_of: IdFn<T, Id>,
    clock: Arc<dyn Clock>,
}

impl<T, Id> CollectionStore<T, Id>
where
    T: Clone + Send + Sync + 'static,
    Id: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new<F>(id_of: F) -> Self
    where
        F: Fn(&T) -> Id + Send + Sync + 'static,
    {
        Self::with_clock(id_of, Arc::new(SystemClock))
    }

    pub fn with_clock<F>(id_of: F, clock: Arc<dyn Clock>) -> Self
    where
        F: Fn(&T) -> Id + Send + Sync + 'static,
    {
        Self {
            inner: Mutex::new(Inner::new()),
            delivery: ReentrantMutex::new(()),
            notifier: Notifier::new(),
            id_of: Arc::new(id_of),
            clock,
        }
    }

    /// Identifier of `item` as this store sees it.
    pub fn id_of(&self, item: &T) -> Id {
        (self.id_of)(item)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// All records in id-list order.
    pub fn get_all(&self) -> Vec<T> {
        self.inner.lock().view().to_vec()
    }

    pub fn get_by_id<Q>(&self, id: &Q) -> Option<T>
    where
        Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().by_id.get(id).cloned()
    }

    pub fn contains<Q>(&self, id: &Q) -> bool
    where
        Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().by_id.contains_key(id)
    }

    /// Copy of the ordered id list.
    pub fn get_ids(&self) -> Vec<Id> {
        self.inner.lock().ids.clone()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock().loading
    }

    pub fn error(&self) -> Option<ErrorValue> {
        self.inner.lock().error.clone()
    }

    pub fn last_updated(&self) -> Option<SystemTime> {
        self.inner.lock().last_updated
    }

    pub fn meta(&self) -> CollectionMeta {
        let inner = self.inner.lock();
        CollectionMeta {
            loading: inner.loading,
            error: inner.error.clone(),
            last_updated: inner.last_updated,
            count: inner.ids.len(),
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Replace the whole collection with `items`, in input order.
    ///
    /// A duplicate id keeps the position of its first occurrence and the value
    /// of its last.
    pub fn set_all<I>(&self, items: I) -> Result<(), NotifyError>
    where
        I: IntoIterator<Item = T>,
    {
        let now = self.clock.now();
        self.mutate(|inner, id_of| {
            inner.clear_items();
            for item in items {
                let id = id_of(&item);
                inner.upsert(id, item);
            }
            inner.loading = false;
            inner.error = None;
            inner.last_updated = Some(now);
        })
    }

    /// Insert `item`, or replace the record with the same id in place.
    pub fn upsert(&self, item: T) -> Result<(), NotifyError> {
        self.mutate(|inner, id_of| {
            let id = id_of(&item);
            inner.upsert(id, item);
        })
    }

    /// Apply [`upsert`](Self::upsert) to each item in order, notifying once.
    pub fn upsert_many<I>(&self, items: I) -> Result<(), NotifyError>
    where
        I: IntoIterator<Item = T>,
    {
        self.mutate(|inner, id_of| {
            for item in items {
                let id = id_of(&item);
                inner.upsert(id, item);
            }
        })
    }

    /// Edit an existing record in place; its position is unchanged.
    ///
    /// Returns `Ok(false)` without notifying when `id` is absent. The closure
    /// must not change the record's id.
    pub fn update<Q, F>(&self, id: &Q, f: F) -> Result<bool, NotifyError>
    where
        Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&mut T),
    {
        let _delivery = self.delivery.lock();
        let watched = !self.notifier.is_empty();
        let views = {
            let mut inner = self.inner.lock();
            if !inner.by_id.contains_key(id) {
                return Ok(false);
            }
            let previous = watched.then(|| inner.view());
            if let Some(record) = inner.by_id.get_mut(id) {
                f(record);
            }
            inner.view = None;
            previous.map(|previous| (inner.view(), previous))
        };
        if let Some((current, previous)) = views {
            self.notifier.notify(&current, &previous)?;
        }
        Ok(true)
    }

    /// Remove one record. Notifies even when `id` is absent.
    pub fn remove<Q>(&self, id: &Q) -> Result<(), NotifyError>
    where
        Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.mutate(|inner, _| {
            if inner.by_id.remove(id).is_some() {
                inner.ids.retain(|existing| <Id as Borrow<Q>>::borrow(existing) != id);
            }
        })
    }

    /// Remove every listed id, notifying once.
    pub fn remove_many<'a, Q, I>(&self, ids: I) -> Result<(), NotifyError>
    where
        Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
        I: IntoIterator<Item = &'a Q>,
    {
        self.mutate(|inner, _| {
            let mut removed: HashSet<&Q> = HashSet::new();
            for id in ids {
                if inner.by_id.remove(id).is_some() {
                    removed.insert(id);
                }
            }
            if !removed.is_empty() {
                inner
                    .ids
                    .retain(|existing| !removed.contains(<Id as Borrow<Q>>::borrow(existing)));
            }
        })
    }

    /// Set the loading flag. Records and error are untouched.
    pub fn set_loading(&self, loading: bool) -> Result<(), NotifyError> {
        self.mutate(|inner, _| inner.loading = loading)
    }

    /// Store a caller-supplied error verbatim and clear `loading`.
    pub fn set_error<E>(&self, err: E) -> Result<(), NotifyError>
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        let err = into_error_value(err);
        self.mutate(|inner, _| {
            inner.error = Some(err);
            inner.loading = false;
        })
    }

    /// Drop every record and reset metadata.
    pub fn clear(&self) -> Result<(), NotifyError> {
        self.mutate(|inner, _| {
            inner.clear_items();
            inner.loading = false;
            inner.error = None;
            inner.last_updated = None;
        })
    }

    /// Listen for changes. The listener receives `(current, previous)` record
    /// sequences.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[T], &[T]) + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    pub fn subscriber_count(&self) -> usize {
        self.notifier.len()
    }

    fn mutate<F>(&self, f: F) -> Result<(), NotifyError>
    where
        F: FnOnce(&mut Inner<T, Id>, &(dyn Fn(&T) -> Id + Send + Sync)),
    {
        let _delivery = self.delivery.lock();
        let watched = !self.notifier.is_empty();
        let views = {
            let mut inner = self.inner.lock();
            let previous = watched.then(|| inner.view());
            f(&mut *inner, self.id_of.as_ref());
            inner.view = None;
            debug_assert_eq!(inner.ids.len(), inner.by_id.len());
            previous.map(|previous| (inner.view(), previous))
        };
        match views {
            Some((current, previous)) => self.notifier.notify(&current, &previous),
            None => Ok(()),
        }
    }
}
