//! Listener registries: the per-event multicast slots everything else is built on.
//!
//! A registry holds zero, one, or many callbacks for a single event. The storage is a
//! tagged variant ([`Slot`]) so the overwhelmingly common zero- and one-subscriber
//! cases never allocate a vector.
//!
//! Two registry flavors share that storage:
//!
//! - [`EventListeners`]: single-threaded (`Rc` entries), used by the stream state
//!   machines that are owned by one event-loop thread
//! - [`SharedListeners`]: `Mutex`-guarded (`Arc` entries), used for server-level
//!   registries that are touched from multiple loop threads
//!
//! # Emission
//!
//! `emit` snapshots the current entries, strips "once" entries from the live slot
//! *before* any callback runs, and then invokes the snapshot in insertion order.
//! Callbacks are therefore free to add or remove listeners (including themselves)
//! while being emitted: the in-flight emission is unaffected, and a once listener
//! cannot re-trigger itself by emitting recursively.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// An identity token for a registered callback.
///
/// The token is only useful for handing back to the registry that produced it
/// via `remove`; it carries no other behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Listener {
    id: u64,
}

impl Listener {
    #[inline]
    fn new(id: u64) -> Self {
        Self { id }
    }
}

/// Tagged 0/1/many storage for listener entries.
///
/// Invariant: the `Many` variant never holds fewer than two entries; removal
/// collapses it back to `One` or `Empty`.
#[derive(Debug, Default)]
pub enum Slot<L> {
    #[default]
    Empty,
    One(L),
    Many(Vec<L>),
}

impl<L> Slot<L> {
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    pub fn len(&self) -> usize {
        match self {
            Slot::Empty => 0,
            Slot::One(_) => 1,
            Slot::Many(entries) => entries.len(),
        }
    }

    /// Appends an entry, upgrading the variant as needed.
    pub fn push(&mut self, entry: L) {
        match std::mem::take(self) {
            Slot::Empty => *self = Slot::One(entry),
            Slot::One(first) => *self = Slot::Many(vec![first, entry]),
            Slot::Many(mut entries) => {
                entries.push(entry);
                *self = Slot::Many(entries);
            }
        }
    }

    /// Removes the first entry matching `pred`, collapsing `Many` when it drops
    /// below two entries. Returns the removed entry, if any.
    pub fn remove_first<F>(&mut self, pred: F) -> Option<L>
    where
        F: Fn(&L) -> bool,
    {
        match std::mem::take(self) {
            Slot::Empty => None,
            Slot::One(entry) => {
                if pred(&entry) {
                    Some(entry)
                } else {
                    *self = Slot::One(entry);
                    None
                }
            }
            Slot::Many(mut entries) => {
                let removed = entries.iter().position(|e| pred(e)).map(|at| entries.remove(at));
                *self = match entries.len() {
                    0 => Slot::Empty,
                    1 => Slot::One(entries.pop().unwrap()),
                    _ => Slot::Many(entries),
                };
                removed
            }
        }
    }

    /// Removes every entry matching `pred`, maintaining the collapse invariant.
    pub fn remove_all<F>(&mut self, pred: F)
    where
        F: Fn(&L) -> bool,
    {
        match std::mem::take(self) {
            Slot::Empty => {}
            Slot::One(entry) => {
                if !pred(&entry) {
                    *self = Slot::One(entry);
                }
            }
            Slot::Many(mut entries) => {
                entries.retain(|e| !pred(e));
                *self = match entries.len() {
                    0 => Slot::Empty,
                    1 => Slot::One(entries.pop().unwrap()),
                    _ => Slot::Many(entries),
                };
            }
        }
    }

    /// Copies the current entries out in insertion order.
    pub fn snapshot(&self) -> Vec<L>
    where
        L: Clone,
    {
        match self {
            Slot::Empty => Vec::new(),
            Slot::One(entry) => vec![entry.clone()],
            Slot::Many(entries) => entries.clone(),
        }
    }

    pub fn clear(&mut self) {
        *self = Slot::Empty;
    }
}

struct Entry<T> {
    id: u64,
    once: bool,
    callback: Rc<dyn Fn(T)>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, once: self.once, callback: Rc::clone(&self.callback) }
    }
}

impl<T> std::fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry").field("id", &self.id).field("once", &self.once).finish_non_exhaustive()
    }
}

/// A single-threaded listener registry for one event of payload type `T`.
///
/// Payloads must be `Clone` because every listener receives its own copy;
/// in practice `T` is `Bytes`, `()` or a cloneable error, all cheap.
#[derive(Debug)]
pub struct EventListeners<T> {
    slot: RefCell<Slot<Entry<T>>>,
    next_id: Cell<u64>,
}

impl<T: Clone> Default for EventListeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> EventListeners<T> {
    pub fn new() -> Self {
        Self { slot: RefCell::new(Slot::Empty), next_id: Cell::new(1) }
    }

    /// Registers `callback` to fire on every emission until removed.
    pub fn add<F>(&self, callback: F) -> Listener
    where
        F: Fn(T) + 'static,
    {
        self.register(callback, false)
    }

    /// Registers `callback` to fire on the next emission only.
    pub fn once<F>(&self, callback: F) -> Listener
    where
        F: Fn(T) + 'static,
    {
        self.register(callback, true)
    }

    fn register<F>(&self, callback: F, once: bool) -> Listener
    where
        F: Fn(T) + 'static,
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.slot.borrow_mut().push(Entry { id, once, callback: Rc::new(callback) });
        Listener::new(id)
    }

    /// Removes the callback registered under `listener`. Removing an unknown or
    /// already-fired once token is a no-op.
    pub fn remove(&self, listener: Listener) {
        self.slot.borrow_mut().remove_first(|e| e.id == listener.id);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slot.borrow().is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slot.borrow().len()
    }

    /// Drops every registered callback.
    pub fn clear(&self) {
        self.slot.borrow_mut().clear();
    }

    /// Delivers `value` to every listener registered at the time of the call.
    ///
    /// With no listeners the value is silently dropped; callers that must not
    /// lose values (error events) layer that policy on top, see
    /// [`ErrorChannel`](crate::ErrorChannel).
    pub fn emit(&self, value: T) {
        let snapshot = {
            let mut slot = self.slot.borrow_mut();
            let snapshot = slot.snapshot();
            if snapshot.iter().any(|e| e.once) {
                slot.remove_all(|e| e.once);
            }
            snapshot
        };

        for entry in snapshot {
            (entry.callback)(value.clone());
        }
    }
}

struct SharedEntry<T> {
    id: u64,
    once: bool,
    callback: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> Clone for SharedEntry<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, once: self.once, callback: Arc::clone(&self.callback) }
    }
}

impl<T> std::fmt::Debug for SharedEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEntry").field("id", &self.id).field("once", &self.once).finish_non_exhaustive()
    }
}

/// The cross-thread registry flavor: same semantics as [`EventListeners`], with
/// the slot behind a mutex and `Send + Sync` callbacks.
///
/// Emission snapshots under the lock and invokes outside it, so callbacks may
/// freely re-enter the registry. Note that the payload itself does not have to
/// be `Send`: emission happens on the calling thread.
#[derive(Debug)]
pub struct SharedListeners<T> {
    slot: Mutex<Slot<SharedEntry<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone> Default for SharedListeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SharedListeners<T> {
    pub fn new() -> Self {
        Self { slot: Mutex::new(Slot::Empty), next_id: AtomicU64::new(1) }
    }

    pub fn add<F>(&self, callback: F) -> Listener
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register(callback, false)
    }

    pub fn once<F>(&self, callback: F) -> Listener
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register(callback, true)
    }

    fn register<F>(&self, callback: F, once: bool) -> Listener
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(SharedEntry { id, once, callback: Arc::new(callback) });
        Listener::new(id)
    }

    pub fn remove(&self, listener: Listener) {
        self.lock().remove_first(|e| e.id == listener.id);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn emit(&self, value: T) {
        let snapshot = {
            let mut slot = self.lock();
            let snapshot = slot.snapshot();
            if snapshot.iter().any(|e| e.once) {
                slot.remove_all(|e| e.once);
            }
            snapshot
        };

        for entry in snapshot {
            (entry.callback)(value.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot<SharedEntry<T>>> {
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
