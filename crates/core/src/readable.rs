//! Readable byte-stream state machine.
//!
//! A [`ReadStream`] buffers pushed payloads and exposes them two ways:
//!
//! - pull style: an `on_readable` listener is told "there is data", and the
//!   consumer calls [`ReadStream::read`] to take it
//! - push style ("flowing"): an `on_data` listener receives every payload as it
//!   arrives, without buffering
//!
//! The two styles can be mixed: `read` always fires a `data` event with whatever
//! it returned, so push-style observers see a consistent byte sequence no matter
//! who drains the buffer.
//!
//! The producer side is [`ReadStream::push`] plus [`ReadStream::push_eof`]; in the
//! HTTP layer those are driven by the connection's decoded protocol events.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

use crate::error::{ErrorChannel, StreamError};
use crate::listener::{EventListeners, Listener};
use crate::DEFAULT_HIGH_WATER_MARK;

const KIND: &str = "read-stream";

#[derive(Debug)]
struct ReadState {
    buffer: BytesMut,
    ended: bool,
    flowing: bool,
    /// A `readable` notification has fired and no `read` has happened since;
    /// further pushes coalesce into it.
    readable_pending: bool,
    high_water_mark: usize,
}

#[derive(Debug)]
struct ReadShared {
    state: RefCell<ReadState>,
    data: EventListeners<Bytes>,
    readable: EventListeners<()>,
    end: EventListeners<()>,
    errors: ErrorChannel,
}

/// A readable byte stream. Handles are cheap clones sharing one state machine.
#[derive(Debug, Clone)]
pub struct ReadStream {
    shared: Rc<ReadShared>,
}

impl Default for ReadStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadStream {
    pub fn new() -> Self {
        Self::with_high_water_mark(DEFAULT_HIGH_WATER_MARK)
    }

    pub fn with_high_water_mark(high_water_mark: usize) -> Self {
        Self {
            shared: Rc::new(ReadShared {
                state: RefCell::new(ReadState {
                    buffer: BytesMut::new(),
                    ended: false,
                    flowing: false,
                    readable_pending: false,
                    high_water_mark,
                }),
                data: EventListeners::new(),
                readable: EventListeners::new(),
                end: EventListeners::new(),
                errors: ErrorChannel::new(KIND),
            }),
        }
    }

    /// Kind tag and instance id, used in logs and pipe provenance.
    #[inline]
    pub fn identity(&self) -> (&'static str, u64) {
        self.shared.errors.identity()
    }

    #[inline]
    pub fn is_ended(&self) -> bool {
        self.shared.state.borrow().ended
    }

    #[inline]
    pub fn is_flowing(&self) -> bool {
        self.shared.state.borrow().flowing
    }

    #[inline]
    pub fn buffered_len(&self) -> usize {
        self.shared.state.borrow().buffer.len()
    }

    /// Feeds a payload into the stream.
    ///
    /// Pushing after [`push_eof`](Self::push_eof) emits [`StreamError::ReadableEnded`]
    /// on the error channel and leaves the buffer untouched. Empty payloads are
    /// no-ops. The returned boolean is the advisory keep-pushing signal: `false`
    /// once buffered bytes reach the high-water mark.
    pub fn push(&self, chunk: Bytes) -> bool {
        enum Action {
            Reject,
            Deliver(Bytes),
            Buffered { notify: bool },
        }

        let action = {
            let mut state = self.shared.state.borrow_mut();
            if state.ended {
                Action::Reject
            } else if chunk.is_empty() {
                return state.buffer.len() < state.high_water_mark;
            } else if state.flowing && self.shared.readable.is_empty() && !self.shared.data.is_empty() {
                // pure data mode: forward immediately, never buffer
                Action::Deliver(chunk)
            } else {
                state.buffer.extend_from_slice(&chunk);
                let notify = !self.shared.readable.is_empty() && !state.readable_pending;
                if notify {
                    state.readable_pending = true;
                }
                Action::Buffered { notify }
            }
        };

        match action {
            Action::Reject => {
                self.shared.errors.emit(StreamError::ReadableEnded);
                false
            }
            Action::Deliver(chunk) => {
                self.shared.data.emit(chunk);
                true
            }
            Action::Buffered { notify } => {
                if notify {
                    self.shared.readable.emit(());
                }
                let state = self.shared.state.borrow();
                state.buffer.len() < state.high_water_mark
            }
        }
    }

    /// Takes up to `count` buffered bytes (everything when `None` or when
    /// `count` exceeds the buffer), detaching them from the remainder.
    ///
    /// Fires a `data` event with exactly the returned payload, and clears the
    /// pending `readable` notification. Returns `None` on an empty buffer.
    pub fn read(&self, count: Option<usize>) -> Option<Bytes> {
        let chunk = {
            let mut state = self.shared.state.borrow_mut();
            state.readable_pending = false;
            if state.buffer.is_empty() {
                None
            } else {
                let take = count.map_or(state.buffer.len(), |n| n.min(state.buffer.len()));
                Some(state.buffer.split_to(take).freeze())
            }
        };

        if let Some(ref bytes) = chunk {
            self.shared.data.emit(bytes.clone());
        }
        chunk
    }

    /// Marks end-of-stream: no further pushes are accepted, the `end` event
    /// fires exactly once, and every listener registry on this instance is
    /// cleared afterwards (breaking stream/handler reference cycles).
    ///
    /// Idempotent.
    pub fn push_eof(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.ended {
                return;
            }
            state.ended = true;
        }

        self.shared.end.emit(());

        self.shared.data.clear();
        self.shared.readable.clear();
        self.shared.end.clear();
        self.shared.errors.clear();
    }

    /// Registers a continuous `data` listener, switching the stream into
    /// flowing mode. Already-buffered data is delivered immediately unless a
    /// `readable` listener is waiting to pull it.
    pub fn on_data<F>(&self, callback: F) -> Listener
    where
        F: Fn(Bytes) + 'static,
    {
        let token = self.shared.data.add(callback);
        self.enter_flowing();
        token
    }

    /// Like [`on_data`](Self::on_data), firing for the next payload only.
    pub fn once_data<F>(&self, callback: F) -> Listener
    where
        F: Fn(Bytes) + 'static,
    {
        let token = self.shared.data.once(callback);
        self.enter_flowing();
        token
    }

    fn enter_flowing(&self) {
        let backlog = {
            let mut state = self.shared.state.borrow_mut();
            state.flowing = true;
            if self.shared.readable.is_empty() && !state.buffer.is_empty() {
                Some(state.buffer.split().freeze())
            } else {
                None
            }
        };
        if let Some(chunk) = backlog {
            self.shared.data.emit(chunk);
        }
    }

    pub fn on_readable<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.readable.add(callback)
    }

    pub fn on_end<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.end.add(callback)
    }

    pub fn once_end<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.end.once(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(StreamError) + 'static,
    {
        self.shared.errors.on_error(callback)
    }

    pub fn once_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(StreamError) + 'static,
    {
        self.shared.errors.once_error(callback)
    }

    pub fn remove_data(&self, listener: Listener) {
        self.shared.data.remove(listener);
    }

    pub fn remove_readable(&self, listener: Listener) {
        self.shared.readable.remove(listener);
    }

    pub fn remove_end(&self, listener: Listener) {
        self.shared.end.remove(listener);
    }

    pub fn remove_error(&self, listener: Listener) {
        self.shared.errors.remove(listener);
    }

    /// Emits an error on this stream's error channel.
    pub fn emit_error(&self, err: StreamError) {
        self.shared.errors.emit(err);
    }
}
