//! Object registries.
//!
//! A [`Registry`] is a keyed store shared by every connection. One mutex
//! guards both the entries and the waiter table, so create, lookup, remove
//! and mutate are atomic with respect to each other and to waiter
//! registration.
//!
//! ## Waiters
//!
//! A connection blocked in an await subscribes to the keys it watches.
//! Mutating or removing a key wakes every subscription registered on that
//! key. Wake-ups are stored as a permit, so a mutation that lands between
//! an evaluation and the subsequent `changed().await` is never lost.
//!
//! ## Generations
//!
//! Every created entry gets a fresh generation number. A reader that saw
//! generation `g` and later finds a different generation under the same key
//! knows the original object was destroyed in between, even if the id was
//! reused.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::Notify;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Key already has a live entry.
    #[error("{registry}: key already present")]
    AlreadyExists {
        /// Registry name
        registry: &'static str,
    },
}

/// Copy of a registry entry taken under the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<T> {
    /// Object state at lookup time
    pub object: T,
    /// Generation of the entry the object was read from
    pub generation: u64,
}

struct Slot<T> {
    object: T,
    generation: u64,
}

struct Waiter {
    id: u64,
    notify: Arc<Notify>,
}

struct RegistryState<K, T> {
    slots: HashMap<K, Slot<T>>,
    waiters: HashMap<K, Vec<Waiter>>,
    next_generation: u64,
    next_waiter: u64,
}

impl<K, T> RegistryState<K, T>
where
    K: Eq + Hash,
{
    fn wake(&self, key: &K) {
        if let Some(waiters) = self.waiters.get(key) {
            for waiter in waiters {
                waiter.notify.notify_one();
            }
        }
    }
}

/// Keyed store with per-key waiter notification.
pub struct Registry<K, T> {
    name: &'static str,
    state: Mutex<RegistryState<K, T>>,
}

impl<K, T> Registry<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    /// Create an empty registry. `name` appears in errors and logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(RegistryState {
                slots: HashMap::new(),
                waiters: HashMap::new(),
                next_generation: 0,
                next_waiter: 0,
            }),
        }
    }

    /// Registry name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn state(&self) -> MutexGuard<'_, RegistryState<K, T>> {
        // A panic while holding the lock cannot leave a slot half-written:
        // every mutation is a single assignment.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new entry, returning its generation.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::AlreadyExists` if `key` is already present.
    pub fn create(&self, key: K, object: T) -> Result<u64, RegistryError> {
        let mut state = self.state();
        if state.slots.contains_key(&key) {
            return Err(RegistryError::AlreadyExists { registry: self.name });
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        state.wake(&key);
        state.slots.insert(key, Slot { object, generation });
        Ok(generation)
    }

    /// Copy the entry stored under `key`.
    pub fn lookup(&self, key: &K) -> Option<Snapshot<T>> {
        self.state()
            .slots
            .get(key)
            .map(|slot| Snapshot { object: slot.object.clone(), generation: slot.generation })
    }

    /// Whether `key` has a live entry.
    pub fn contains(&self, key: &K) -> bool {
        self.state().slots.contains_key(key)
    }

    /// Remove the entry under `key`, waking its waiters.
    pub fn remove(&self, key: &K) -> Option<T> {
        let mut state = self.state();
        let slot = state.slots.remove(key)?;
        state.wake(key);
        Some(slot.object)
    }

    /// Remove the entry under `key` if `predicate` accepts it.
    ///
    /// Returns `Some(Ok(object))` when removed, `Some(Err(object))` with a
    /// copy when the predicate refused, and `None` when absent.
    pub fn remove_if(&self, key: &K, predicate: impl FnOnce(&T) -> bool) -> Option<Result<T, T>> {
        let mut state = self.state();
        let slot = state.slots.get(key)?;
        if !predicate(&slot.object) {
            return Some(Err(slot.object.clone()));
        }

        let slot = state.slots.remove(key)?;
        state.wake(key);
        Some(Ok(slot.object))
    }

    /// Apply `f` to the entry under `key`, waking its waiters.
    pub fn mutate<R>(&self, key: &K, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut state = self.state();
        let slot = state.slots.get_mut(key)?;
        let result = f(&mut slot.object);
        state.wake(key);
        Some(result)
    }

    /// Apply `f` to the entry under `key` without waking waiters.
    ///
    /// Used for clock-driven values, whose waiters track a deadline instead
    /// of notifications.
    pub fn refresh<R>(&self, key: &K, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut state = self.state();
        state.slots.get_mut(key).map(|slot| f(&mut slot.object))
    }

    /// Copy every entry.
    pub fn snapshot(&self) -> Vec<T> {
        self.state().slots.values().map(|slot| slot.object.clone()).collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state().slots.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.state().slots.is_empty()
    }

    /// Number of registered subscriptions across all keys.
    pub fn waiter_count(&self) -> usize {
        self.state().waiters.values().map(Vec::len).sum()
    }

    /// Register interest in `keys`.
    ///
    /// The subscription observes every mutation or removal that happens
    /// after this call returns. Dropping it deregisters.
    pub fn subscribe(&self, keys: impl IntoIterator<Item = K>) -> Subscription<'_, K, T> {
        let mut keys: Vec<K> = keys.into_iter().collect();
        let notify = Arc::new(Notify::new());

        let mut state = self.state();
        let id = state.next_waiter;
        state.next_waiter += 1;

        let mut registered = Vec::with_capacity(keys.len());
        for key in keys.drain(..) {
            if registered.contains(&key) {
                continue;
            }
            state
                .waiters
                .entry(key.clone())
                .or_default()
                .push(Waiter { id, notify: Arc::clone(&notify) });
            registered.push(key);
        }

        Subscription { registry: self, id, keys: registered, notify }
    }
}

impl<K, T> std::fmt::Debug for Registry<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Interest in a set of registry keys.
pub struct Subscription<'a, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    registry: &'a Registry<K, T>,
    id: u64,
    keys: Vec<K>,
    notify: Arc<Notify>,
}

impl<K, T> Subscription<'_, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    /// Wait until one of the subscribed keys is mutated or removed.
    ///
    /// Resolves immediately if a change happened since the previous call.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }

    /// Keys this subscription watches, without duplicates.
    pub fn keys(&self) -> &[K] {
        &self.keys
    }
}

impl<K, T> Drop for Subscription<'_, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    fn drop(&mut self) {
        let mut state = self.registry.state();
        for key in &self.keys {
            if let Some(waiters) = state.waiters.get_mut(key) {
                waiters.retain(|w| w.id != self.id);
                if waiters.is_empty() {
                    state.waiters.remove(key);
                }
            }
        }
    }
}
