//! Shared test utilities.

#![allow(dead_code, unused_imports)]

use parking_lot::Mutex;
use statekit::{CollectionStore, ManualClock, StateConfig, StateManager, Subscription};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};

/// Record type used across collection tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: u32,
    pub name: String,
}

pub fn item(id: u32, name: &str) -> Item {
    Item {
        id,
        name: name.to_string(),
    }
}

pub fn item_store() -> CollectionStore<Item, u32> {
    CollectionStore::new(|i: &Item| i.id)
}

/// Counts how many times a listener fires.
pub struct Counter {
    count: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Listener closure bumping this counter; works for any payload.
    pub fn listener<T: ?Sized + 'static>(&self) -> impl Fn(&T, &T) + Send + Sync + 'static {
        let count = Arc::clone(&self.count);
        move |_: &T, _: &T| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Collects the id sequence delivered on each collection notification.
pub fn record_ids(store: &CollectionStore<Item, u32>) -> (Arc<Mutex<Vec<Vec<u32>>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_c = Arc::clone(&seen);
    let sub = store.subscribe(move |current, _previous| {
        seen_c.lock().push(current.iter().map(|i| i.id).collect());
    });
    (seen, sub)
}

/// Manager driven by a manual clock.
pub fn manager_with_clock() -> (StateManager, ManualClock) {
    let clock = ManualClock::default();
    let manager = StateManager::with_clock(StateConfig::default(), Arc::new(clock.clone()));
    (manager, clock)
}

/// Parks a listener mid-delivery until the test lets it go.
///
/// Each side uses it once: the listener calls `hold`, the test calls
/// `wait_entered` and later `release`.
pub struct Gate {
    entered: Barrier,
    release: Barrier,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        })
    }

    pub fn hold(&self) {
        self.entered.wait();
        self.release.wait();
    }

    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    pub fn release(&self) {
        self.release.wait();
    }
}
