//! Composition root for the state core.
//!
//! A [`StateManager`] owns two named store registries (entity and
//! collection), one [`TtlCache`], and the global slices: loading flags,
//! locale, theme, current user, and free-form metadata.
//!
//! Slice mutations notify the manager's own subscribers with a full
//! [`AppState`] snapshot, in commit order across threads. Store mutations
//! only notify that store's subscribers. There is no ordering or atomicity
//! across stores.
//!
//! Managers are plain values: construct one per application (or per test)
//! and share it via `Arc`.

use std::any::{type_name, Any};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use serde_json::Value;

use crate::cache::TtlCache;
use crate::clock::{Clock, SystemClock};
use crate::config::StateConfig;
use crate::error::{NotifyError, StateError};
use crate::notifier::{Notifier, Subscription};
use crate::store::{field_id, CollectionStore, EntityStore, RecordId};

/// Which loading map a scoped flag lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadingScope {
    Api,
    Form,
    Page,
}

/// Loading flags. Scoped maps only hold scopes that are currently loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadingState {
    pub global: bool,
    pub apis: BTreeMap<String, bool>,
    pub forms: BTreeMap<String, bool>,
    pub pages: BTreeMap<String, bool>,
}

impl LoadingState {
    fn scope(&self, scope: LoadingScope) -> &BTreeMap<String, bool> {
        match scope {
            LoadingScope::Api => &self.apis,
            LoadingScope::Form => &self.forms,
            LoadingScope::Page => &self.pages,
        }
    }

    fn scope_mut(&mut self, scope: LoadingScope) -> &mut BTreeMap<String, bool> {
        match scope {
            LoadingScope::Api => &mut self.apis,
            LoadingScope::Form => &mut self.forms,
            LoadingScope::Page => &mut self.pages,
        }
    }

    /// True if the global flag or any scoped flag is set.
    pub fn any(&self) -> bool {
        self.global
            || [&self.apis, &self.forms, &self.pages]
                .iter()
                .any(|map| map.values().any(|loading| *loading))
    }

    pub fn is_set(&self, scope: LoadingScope, id: &str) -> bool {
        self.scope(scope).get(id).copied().unwrap_or(false)
    }
}

/// Snapshot of every global slice, delivered to manager subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppState {
    pub loading: LoadingState,
    pub locale: String,
    pub theme: String,
    pub user: Option<Value>,
    pub meta: BTreeMap<String, Value>,
}

impl AppState {
    fn initial(config: &StateConfig) -> Self {
        Self {
            loading: LoadingState::default(),
            locale: config.defaults.locale.clone(),
            theme: config.defaults.theme.clone(),
            user: None,
            meta: BTreeMap::new(),
        }
    }
}

/// A registered store with its concrete type erased.
struct Registered {
    store: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Registered {
    fn new<S: Any + Send + Sync>(store: Arc<S>) -> Self {
        Self {
            store,
            type_name: type_name::<S>(),
        }
    }

    fn downcast<S: Any + Send + Sync>(&self) -> Option<Arc<S>> {
        Arc::clone(&self.store).downcast::<S>().ok()
    }
}

type Registry = HashMap<String, Registered>;

struct GlobalSlices {
    state: AppState,
    /// Nesting depth of `batch` calls in progress.
    batch_depth: usize,
    /// State when the outermost batch began.
    batch_start: Option<AppState>,
}

pub struct StateManager {
    entities: Mutex<Registry>,
    collections: Mutex<Registry>,
    global: Mutex<GlobalSlices>,
    /// Held from slice commit through delivery, and for a whole `batch`.
    delivery: ReentrantMutex<()>,
    notifier: Notifier<AppState>,
    cache: TtlCache,
    config: StateConfig,
    clock: Arc<dyn Clock>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::with_config(StateConfig::default())
    }

    pub fn with_config(config: StateConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a manager whose stores and cache read time from `clock`.
    pub fn with_clock(config: StateConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entities: Mutex::new(HashMap::new()),
            collections: Mutex::new(HashMap::new()),
            global: Mutex::new(GlobalSlices {
                state: AppState::initial(&config),
                batch_depth: 0,
                batch_start: None,
            }),
            delivery: ReentrantMutex::new(()),
            notifier: Notifier::new(),
            cache: TtlCache::with_config(&config.cache, Arc::clone(&clock)),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    // ========================================================================
    // Entity stores
    // ========================================================================

    /// Return the entity store named `name`, creating it if needed.
    ///
    /// Fails only when `name` is already registered with another payload type.
    pub fn create_entity_store<T>(&self, name: &str) -> Result<Arc<EntityStore<T>>, StateError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut stores = self.entities.lock();
        if let Some(existing) = stores.get(name) {
            return existing
                .downcast::<EntityStore<T>>()
                .ok_or_else(|| mismatch::<EntityStore<T>>(name, existing));
        }

        let store = Arc::new(EntityStore::<T>::with_clock(Arc::clone(&self.clock)));
        stores.insert(name.to_string(), Registered::new(Arc::clone(&store)));
        tracing::debug!(name, payload = type_name::<T>(), "registered entity store");
        Ok(store)
    }

    /// Look up a registered entity store. `None` if absent or registered with
    /// another payload type.
    pub fn get_entity_store<T>(&self, name: &str) -> Option<Arc<EntityStore<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        lookup::<EntityStore<T>>(&self.entities.lock(), name)
    }

    /// Deregister a store and hand it back.
    ///
    /// Its subscribers are not notified; they simply stop hearing from the
    /// manager. Callers wanting a terminal notification can `clear()` the
    /// returned store.
    pub fn remove_entity_store<T>(&self, name: &str) -> Option<Arc<EntityStore<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        take::<EntityStore<T>>(&mut self.entities.lock(), name)
    }

    pub fn entity_store_names(&self) -> Vec<String> {
        sorted_names(&self.entities.lock())
    }

    // ========================================================================
    // Collection stores
    // ========================================================================

    /// Return the collection store named `name`, creating it with `id_of` if
    /// needed. An existing store keeps its original id extractor.
    pub fn create_collection_store<T, Id, F>(
        &self,
        name: &str,
        id_of: F,
    ) -> Result<Arc<CollectionStore<T, Id>>, StateError>
    where
        T: Clone + Send + Sync + 'static,
        Id: Eq + Hash + Clone + Send + Sync + 'static,
        F: Fn(&T) -> Id + Send + Sync + 'static,
    {
        let mut stores = self.collections.lock();
        if let Some(existing) = stores.get(name) {
            return existing
                .downcast::<CollectionStore<T, Id>>()
                .ok_or_else(|| mismatch::<CollectionStore<T, Id>>(name, existing));
        }

        let store = Arc::new(CollectionStore::with_clock(id_of, Arc::clone(&self.clock)));
        stores.insert(name.to_string(), Registered::new(Arc::clone(&store)));
        tracing::debug!(name, payload = type_name::<T>(), "registered collection store");
        Ok(store)
    }

    /// JSON-record collection keyed by the object field `id_field`.
    pub fn create_record_store(
        &self,
        name: &str,
        id_field: &str,
    ) -> Result<Arc<CollectionStore<Value, RecordId>>, StateError> {
        self.create_collection_store(name, field_id(id_field))
    }

    pub fn get_collection_store<T, Id>(&self, name: &str) -> Option<Arc<CollectionStore<T, Id>>>
    where
        T: Clone + Send + Sync + 'static,
        Id: Eq + Hash + Clone + Send + Sync + 'static,
    {
        lookup::<CollectionStore<T, Id>>(&self.collections.lock(), name)
    }

    pub fn get_record_store(&self, name: &str) -> Option<Arc<CollectionStore<Value, RecordId>>> {
        self.get_collection_store(name)
    }

    /// Deregister a collection store and hand it back, without notifying.
    pub fn remove_collection_store<T, Id>(&self, name: &str) -> Option<Arc<CollectionStore<T, Id>>>
    where
        T: Clone + Send + Sync + 'static,
        Id: Eq + Hash + Clone + Send + Sync + 'static,
    {
        take::<CollectionStore<T, Id>>(&mut self.collections.lock(), name)
    }

    pub fn collection_store_names(&self) -> Vec<String> {
        sorted_names(&self.collections.lock())
    }

    // ========================================================================
    // Cache
    // ========================================================================

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    // ========================================================================
    // Loading slice
    // ========================================================================

    pub fn set_global_loading(&self, loading: bool) -> Result<(), NotifyError> {
        self.update(|state| state.loading.global = loading)
    }

    /// Set or clear one scoped loading flag. Clearing removes the entry.
    pub fn set_loading(&self, scope: LoadingScope, id: &str, loading: bool) -> Result<(), NotifyError> {
        self.update(|state| {
            let map = state.loading.scope_mut(scope);
            if loading {
                map.insert(id.to_string(), true);
            } else {
                map.remove(id);
            }
        })
    }

    pub fn set_api_loading(&self, id: &str, loading: bool) -> Result<(), NotifyError> {
        self.set_loading(LoadingScope::Api, id, loading)
    }

    pub fn set_form_loading(&self, id: &str, loading: bool) -> Result<(), NotifyError> {
        self.set_loading(LoadingScope::Form, id, loading)
    }

    pub fn set_page_loading(&self, id: &str, loading: bool) -> Result<(), NotifyError> {
        self.set_loading(LoadingScope::Page, id, loading)
    }

    /// True if anything at all is loading.
    pub fn is_loading(&self) -> bool {
        self.global.lock().state.loading.any()
    }

    pub fn is_global_loading(&self) -> bool {
        self.global.lock().state.loading.global
    }

    pub fn is_scope_loading(&self, scope: LoadingScope, id: &str) -> bool {
        self.global.lock().state.loading.is_set(scope, id)
    }

    pub fn is_api_loading(&self, id: &str) -> bool {
        self.is_scope_loading(LoadingScope::Api, id)
    }

    pub fn is_form_loading(&self, id: &str) -> bool {
        self.is_scope_loading(LoadingScope::Form, id)
    }

    pub fn is_page_loading(&self, id: &str) -> bool {
        self.is_scope_loading(LoadingScope::Page, id)
    }

    pub fn loading(&self) -> LoadingState {
        self.global.lock().state.loading.clone()
    }

    // ========================================================================
    // Locale / theme / user / meta
    // ========================================================================

    pub fn set_locale(&self, locale: impl Into<String>) -> Result<(), NotifyError> {
        let locale = locale.into();
        self.update(|state| state.locale = locale)
    }

    pub fn locale(&self) -> String {
        self.global.lock().state.locale.clone()
    }

    pub fn set_theme(&self, theme: impl Into<String>) -> Result<(), NotifyError> {
        let theme = theme.into();
        self.update(|state| state.theme = theme)
    }

    pub fn theme(&self) -> String {
        self.global.lock().state.theme.clone()
    }

    pub fn set_user(&self, user: Value) -> Result<(), NotifyError> {
        self.update(|state| state.user = Some(user))
    }

    pub fn clear_user(&self) -> Result<(), NotifyError> {
        self.update(|state| state.user = None)
    }

    pub fn user(&self) -> Option<Value> {
        self.global.lock().state.user.clone()
    }

    pub fn set_meta(&self, key: impl Into<String>, value: Value) -> Result<(), NotifyError> {
        let key = key.into();
        self.update(|state| {
            state.meta.insert(key, value);
        })
    }

    pub fn get_meta(&self, key: &str) -> Option<Value> {
        self.global.lock().state.meta.get(key).cloned()
    }

    pub fn remove_meta(&self, key: &str) -> Result<(), NotifyError> {
        self.update(|state| {
            state.meta.remove(key);
        })
    }

    pub fn clear_meta(&self) -> Result<(), NotifyError> {
        self.update(|state| state.meta.clear())
    }

    // ========================================================================
    // Snapshot / subscription
    // ========================================================================

    /// Full copy of the global slices.
    pub fn state(&self) -> AppState {
        self.global.lock().state.clone()
    }

    /// Listen for slice changes. Store mutations never reach this listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AppState, &AppState) + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    /// Run `f` with slice notifications deferred.
    ///
    /// When the outermost batch ends, subscribers get one notification with
    /// (final state, state before the batch), and only if something changed.
    /// Store notifications are not affected.
    ///
    /// A batch is exclusive to the calling thread: slice writes and `reset`
    /// from other threads wait until it ends, so they are never folded into
    /// it. `f` must not wait on another thread that writes slices.
    pub fn batch<R, F>(&self, f: F) -> Result<R, NotifyError>
    where
        F: FnOnce(&Self) -> R,
    {
        let _delivery = self.delivery.lock();
        {
            let mut global = self.global.lock();
            if global.batch_depth == 0 {
                global.batch_start = Some(global.state.clone());
            }
            global.batch_depth += 1;
        }

        // Unwind path: keep the depth counter balanced.
        let guard = scopeguard::guard((), |_| {
            let mut global = self.global.lock();
            global.batch_depth -= 1;
            if global.batch_depth == 0 {
                global.batch_start = None;
            }
        });
        let result = f(self);
        scopeguard::ScopeGuard::into_inner(guard);

        let pending = {
            let mut global = self.global.lock();
            global.batch_depth -= 1;
            if global.batch_depth == 0 {
                global
                    .batch_start
                    .take()
                    .filter(|start| *start != global.state)
                    .map(|start| (global.state.clone(), start))
            } else {
                None
            }
        };

        if let Some((current, previous)) = pending {
            self.notifier.notify(&current, &previous)?;
        }
        Ok(result)
    }

    /// Restore every global slice to its configured default, drop both store
    /// registries, and empty the cache.
    ///
    /// Registry and slice locks are taken together (entities, collections,
    /// globals) so no other call observes a half-reset manager. Dropped stores
    /// do not notify their subscribers. Manager subscribers are notified once.
    pub fn reset(&self) -> Result<(), NotifyError> {
        let _delivery = self.delivery.lock();
        let notification = {
            let mut entities = self.entities.lock();
            let mut collections = self.collections.lock();
            let mut global = self.global.lock();

            let dropped = entities.len() + collections.len();
            entities.clear();
            collections.clear();
            self.cache.clear_all_cache();

            let previous = std::mem::replace(&mut global.state, AppState::initial(&self.config));
            tracing::debug!(dropped_stores = dropped, "state manager reset");

            if global.batch_depth > 0 {
                None
            } else {
                Some((global.state.clone(), previous))
            }
        };

        match notification {
            Some((current, previous)) => self.notifier.notify(&current, &previous),
            None => Ok(()),
        }
    }

    fn update<F>(&self, f: F) -> Result<(), NotifyError>
    where
        F: FnOnce(&mut AppState),
    {
        let _delivery = self.delivery.lock();
        let (current, previous) = {
            let mut global = self.global.lock();
            let previous = global.state.clone();
            f(&mut global.state);
            if global.batch_depth > 0 {
                return Ok(());
            }
            (global.state.clone(), previous)
        };
        self.notifier.notify(&current, &previous)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn mismatch<S>(name: &str, existing: &Registered) -> StateError {
    StateError::TypeMismatch {
        name: name.to_string(),
        registered: existing.type_name,
        requested: type_name::<S>(),
    }
}

fn lookup<S: Any + Send + Sync>(registry: &Registry, name: &str) -> Option<Arc<S>> {
    let entry = registry.get(name)?;
    let store = entry.downcast::<S>();
    if store.is_none() {
        tracing::warn!(
            name,
            registered = entry.type_name,
            requested = type_name::<S>(),
            "store lookup with mismatched type"
        );
    }
    store
}

fn take<S: Any + Send + Sync>(registry: &mut Registry, name: &str) -> Option<Arc<S>> {
    let entry = registry.remove(name)?;
    tracing::debug!(name, "removed store");
    // A wrong type parameter still deregisters; the handle just can't be typed.
    entry.downcast::<S>()
}

fn sorted_names(registry: &Registry) -> Vec<String> {
    let mut names: Vec<String> = registry.keys().cloned().collect();
    names.sort();
    names
}
