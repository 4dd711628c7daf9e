//! Stream errors and the error channel.
//!
//! In an event-driven system there is no caller to throw back to: an error either
//! reaches a registered listener or it reaches the log. [`ErrorChannel`] implements
//! that contract — every stream embeds one, and emission with no listeners logs the
//! error together with the owner's kind and instance id so failures never vanish
//! silently.
//!
//! [`StreamError`] is `Clone` because a single error may be delivered to several
//! listeners, and may be re-delivered downstream by a pipe with provenance
//! attached (see [`StreamError::Piped`]).

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::error;

use crate::listener::{EventListeners, Listener, SharedListeners};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-wide unique instance id, used to identify the emitting
/// object in logs and in piped-error provenance.
pub(crate) fn next_instance_id() -> u64 {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// `push` was called on a readable stream that already ended.
    #[error("readable stream already ended")]
    ReadableEnded,

    /// `write` was called on a writable stream that already ended.
    #[error("writable stream already ended")]
    WritableEnded,

    /// An error relayed across a pipe, carrying the original emitter and the
    /// most recent relaying stage so multi-stage pipelines can report which
    /// stage failed.
    #[error("{origin_kind}#{origin_id} (relayed by {relay_kind}#{relay_id}): {message}")]
    Piped { origin_kind: &'static str, origin_id: u64, relay_kind: &'static str, relay_id: u64, message: String },

    #[error("{message}")]
    Other { message: String },
}

impl StreamError {
    pub fn other<S: ToString>(message: S) -> Self {
        Self::Other { message: message.to_string() }
    }

    /// Wraps `inner` for delivery across a pipe stage identified by
    /// `(relay_kind, relay_id)`.
    ///
    /// A first-time wrap records the relaying stage as the origin too; wrapping
    /// an already-piped error keeps its original origin and only advances the
    /// relay, so the provenance always reads "first emitter + last hop".
    pub fn piped(inner: &StreamError, relay_kind: &'static str, relay_id: u64) -> Self {
        match inner {
            StreamError::Piped { origin_kind, origin_id, message, .. } => StreamError::Piped {
                origin_kind: *origin_kind,
                origin_id: *origin_id,
                relay_kind,
                relay_id,
                message: message.clone(),
            },
            other => StreamError::Piped {
                origin_kind: relay_kind,
                origin_id: relay_id,
                relay_kind,
                relay_id,
                message: other.to_string(),
            },
        }
    }
}

/// Per-object error multicast with a logged fallback.
///
/// Single-threaded flavor; see [`SharedErrorChannel`] for state shared across
/// loop threads.
#[derive(Debug)]
pub struct ErrorChannel {
    kind: &'static str,
    id: u64,
    listeners: EventListeners<StreamError>,
}

impl ErrorChannel {
    pub fn new(kind: &'static str) -> Self {
        Self { kind, id: next_instance_id(), listeners: EventListeners::new() }
    }

    /// The owner's kind tag and instance id, used for logs and pipe provenance.
    #[inline]
    pub fn identity(&self) -> (&'static str, u64) {
        (self.kind, self.id)
    }

    pub fn on_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(StreamError) + 'static,
    {
        self.listeners.add(callback)
    }

    pub fn once_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(StreamError) + 'static,
    {
        self.listeners.once(callback)
    }

    pub fn remove(&self, listener: Listener) {
        self.listeners.remove(listener);
    }

    #[inline]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Delivers `err` to the registered listeners, or logs it when there are
    /// none. Errors are never dropped without trace.
    pub fn emit(&self, err: StreamError) {
        if self.listeners.is_empty() {
            error!(kind = self.kind, id = self.id, cause = %err, "unhandled stream error");
        } else {
            self.listeners.emit(err);
        }
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }
}

/// Cross-thread variant of [`ErrorChannel`] for server-level state.
#[derive(Debug)]
pub struct SharedErrorChannel {
    kind: &'static str,
    id: u64,
    listeners: SharedListeners<StreamError>,
}

impl SharedErrorChannel {
    pub fn new(kind: &'static str) -> Self {
        Self { kind, id: next_instance_id(), listeners: SharedListeners::new() }
    }

    #[inline]
    pub fn identity(&self) -> (&'static str, u64) {
        (self.kind, self.id)
    }

    pub fn on_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(StreamError) + Send + Sync + 'static,
    {
        self.listeners.add(callback)
    }

    pub fn once_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(StreamError) + Send + Sync + 'static,
    {
        self.listeners.once(callback)
    }

    pub fn remove(&self, listener: Listener) {
        self.listeners.remove(listener);
    }

    pub fn emit(&self, err: StreamError) {
        if self.listeners.is_empty() {
            error!(kind = self.kind, id = self.id, cause = %err, "unhandled stream error");
        } else {
            self.listeners.emit(err);
        }
    }
}
