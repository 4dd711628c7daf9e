//! Writable byte-stream state machine.
//!
//! A [`WriteStream`] accepts [`write`](WriteStream::write) calls and forwards the
//! payloads to a [`WriteSink`] — the downstream owned by whoever constructed the
//! stream (in the HTTP layer, the connection's outbound frame queue).
//!
//! Corking ([`cork`](WriteStream::cork) / [`uncork`](WriteStream::uncork)) buffers
//! writes without forwarding; uncorking at depth zero flushes the queue exactly
//! once, preserving arrival order. [`end`](WriteStream::end) is idempotent, flushes
//! any corked buffer first, and fires `finish` exactly once.
//!
//! Back-pressure is advisory: `write` returns whether the caller should keep
//! writing (buffered bytes below the high-water mark) and a `drain` event fires
//! once the queue empties again, but nothing enforces the signal.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::{ErrorChannel, StreamError};
use crate::listener::{EventListeners, Listener};
use crate::DEFAULT_HIGH_WATER_MARK;

const KIND: &str = "write-stream";

/// The downstream a [`WriteStream`] forwards into.
///
/// Implementations must not call back into the owning stream from `deliver` or
/// `finish`; both are invoked synchronously from inside the stream's state
/// transitions.
pub trait WriteSink {
    /// Accepts one payload, in arrival order.
    fn deliver(&mut self, chunk: Bytes);

    /// Signals that no further payloads will be delivered.
    fn finish(&mut self);
}

/// Completion callback for a single `write`.
pub type WriteDone = Box<dyn FnOnce(Result<(), StreamError>)>;

#[derive(Debug)]
struct WriteState {
    ended: bool,
    finished: bool,
    corked: u32,
    queued_bytes: usize,
    needs_drain: bool,
    high_water_mark: usize,
}

struct WriteShared {
    state: RefCell<WriteState>,
    queue: RefCell<VecDeque<(Bytes, Option<WriteDone>)>>,
    sink: RefCell<Box<dyn WriteSink>>,
    drain: EventListeners<()>,
    finish: EventListeners<()>,
    errors: ErrorChannel,
}

impl std::fmt::Debug for WriteShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteShared").field("state", &self.state).finish_non_exhaustive()
    }
}

/// A writable byte stream. Handles are cheap clones sharing one state machine.
#[derive(Debug, Clone)]
pub struct WriteStream {
    shared: Rc<WriteShared>,
}

impl WriteStream {
    pub fn new<S>(sink: S) -> Self
    where
        S: WriteSink + 'static,
    {
        Self::with_high_water_mark(sink, DEFAULT_HIGH_WATER_MARK)
    }

    pub fn with_high_water_mark<S>(sink: S, high_water_mark: usize) -> Self
    where
        S: WriteSink + 'static,
    {
        Self {
            shared: Rc::new(WriteShared {
                state: RefCell::new(WriteState {
                    ended: false,
                    finished: false,
                    corked: 0,
                    queued_bytes: 0,
                    needs_drain: false,
                    high_water_mark,
                }),
                queue: RefCell::new(VecDeque::new()),
                sink: RefCell::new(Box::new(sink)),
                drain: EventListeners::new(),
                finish: EventListeners::new(),
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
    pub fn is_finished(&self) -> bool {
        self.shared.state.borrow().finished
    }

    #[inline]
    pub fn cork_depth(&self) -> u32 {
        self.shared.state.borrow().corked
    }

    /// Writes a payload, invoking `done` when the payload has been handed to the
    /// sink (or rejected).
    ///
    /// Writing after [`end`](Self::end) emits [`StreamError::WritableEnded`] and
    /// still invokes `done` — with the error — so callers never wait on a
    /// completion that will not come. Returns the advisory keep-writing signal.
    pub fn write(&self, chunk: Bytes, done: Option<WriteDone>) -> bool {
        enum Action {
            Rejected,
            Queued { keep_writing: bool },
            Forward,
        }

        let action = {
            let mut state = self.shared.state.borrow_mut();
            if state.ended {
                Action::Rejected
            } else if state.corked > 0 {
                state.queued_bytes += chunk.len();
                let keep_writing = state.queued_bytes < state.high_water_mark;
                if !keep_writing {
                    state.needs_drain = true;
                }
                Action::Queued { keep_writing }
            } else {
                Action::Forward
            }
        };

        match action {
            Action::Rejected => {
                self.shared.errors.emit(StreamError::WritableEnded);
                if let Some(done) = done {
                    done(Err(StreamError::WritableEnded));
                }
                false
            }
            Action::Queued { keep_writing } => {
                self.shared.queue.borrow_mut().push_back((chunk, done));
                keep_writing
            }
            Action::Forward => {
                self.shared.sink.borrow_mut().deliver(chunk);
                if let Some(done) = done {
                    done(Ok(()));
                }
                true
            }
        }
    }

    /// Increments the cork depth; writes buffer until the matching `uncork`.
    pub fn cork(&self) {
        self.shared.state.borrow_mut().corked += 1;
    }

    /// Decrements the cork depth, flushing the buffered writes in arrival order
    /// once it reaches zero. Uncorking an uncorked stream is a no-op.
    pub fn uncork(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.corked == 0 {
                return;
            }
            state.corked -= 1;
            if state.corked > 0 {
                return;
            }
        }
        self.flush_queue();
    }

    /// Ends the stream: flushes any corked buffer, tells the sink no more data
    /// is coming, and fires `finish` exactly once. Idempotent — a second call
    /// observes `ended` and returns.
    pub fn end(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.ended {
                return;
            }
            state.ended = true;
            // the corked buffer is flushed regardless of depth
            state.corked = 0;
        }

        self.flush_queue();
        self.shared.sink.borrow_mut().finish();
        self.shared.state.borrow_mut().finished = true;

        self.shared.finish.emit(());
        self.shared.finish.clear();
        self.shared.drain.clear();
    }

    fn flush_queue(&self) {
        let drained: Vec<(Bytes, Option<WriteDone>)> = {
            let mut queue = self.shared.queue.borrow_mut();
            let mut state = self.shared.state.borrow_mut();
            state.queued_bytes = 0;
            queue.drain(..).collect()
        };

        if drained.is_empty() {
            return;
        }

        for (chunk, done) in drained {
            self.shared.sink.borrow_mut().deliver(chunk);
            if let Some(done) = done {
                done(Ok(()));
            }
        }

        let fire_drain = {
            let mut state = self.shared.state.borrow_mut();
            std::mem::take(&mut state.needs_drain)
        };
        if fire_drain {
            self.shared.drain.emit(());
        }
    }

    pub fn on_drain<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.drain.add(callback)
    }

    pub fn on_finish<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.finish.add(callback)
    }

    pub fn once_finish<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.finish.once(callback)
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

    pub fn remove_drain(&self, listener: Listener) {
        self.shared.drain.remove(listener);
    }

    pub fn remove_finish(&self, listener: Listener) {
        self.shared.finish.remove(listener);
    }

    pub fn remove_error(&self, listener: Listener) {
        self.shared.errors.remove(listener);
    }

    /// Emits an error on this stream's error channel.
    pub fn emit_error(&self, err: StreamError) {
        self.shared.errors.emit(err);
    }
}
