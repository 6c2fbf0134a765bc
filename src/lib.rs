//! Reactive state core.
//!
//! A registry of named, normalized data stores layered over a synchronous
//! pub/sub primitive, an independent TTL cache, and a handful of global UI
//! slices, all owned by one [`StateManager`].
//!
//! ```text
//! StateManager
//!   ├── entity stores      name → EntityStore<T>          ─┐
//!   ├── collection stores  name → CollectionStore<T, Id>   ├─ Notifier per store
//!   ├── global slices      loading / locale / theme / user / meta ─ Notifier<AppState>
//!   └── TtlCache           key → (value, expires_at)
//! ```
//!
//! Every operation is synchronous and runs on the caller's thread. Each
//! store guards its own data with a lock, releases it, then fans out
//! `(current, previous)` to its listeners.
//!
//! # Example
//!
//! ```
//! use statekit::StateManager;
//! use serde_json::json;
//!
//! let manager = StateManager::new();
//! let users = manager.create_record_store("users", "id").unwrap();
//!
//! let _sub = users.subscribe(|current, _previous| {
//!     println!("{} users", current.len());
//! });
//!
//! users.set_loading(true).unwrap();
//! users
//!     .set_all(vec![json!({"id": 1, "name": "ada"}), json!({"id": 2, "name": "grace"})])
//!     .unwrap();
//! assert_eq!(users.count(), 2);
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod notifier;
pub mod store;

pub use cache::{CacheEntry, CachedValue, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, ConfigError, Defaults, StateConfig};
pub use error::{ErrorValue, NotifyError, StateError};
pub use manager::{AppState, LoadingScope, LoadingState, StateManager};
pub use notifier::{Listener, Notifier, Subscription, SubscriptionId};
pub use store::{field_id, CollectionMeta, CollectionStore, EntityState, EntityStore, RecordId};
