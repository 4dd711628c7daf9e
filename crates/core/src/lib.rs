//! Evented stream core: a Node-style asynchronous I/O surface for Rust
//!
//! This crate provides the application-facing abstraction layered on top of an
//! event-loop-driven networking runtime: listener registries, readable and
//! writable byte-stream state machines, a pipe operator, and the runtime handle
//! that owns the event-loop threads and the process-lifetime work counter.
//!
//! The wire protocols themselves (HTTP framing and friends) live elsewhere; see
//! the companion `evio-http` crate, which feeds decoded protocol events into
//! these streams.
//!
//! # Model
//!
//! Everything here is callback-driven and synchronous against in-memory state:
//! `push`, `read` and `write` return immediately, and all suspension happens by
//! scheduling continuations onto an event-loop thread. Each stream is owned by
//! exactly one loop thread and needs no locking; only the cross-thread registry
//! flavors ([`SharedListeners`], [`SharedErrorChannel`]) take a lock.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use evio_core::{pipe, ReadStream, WriteSink, WriteStream};
//!
//! struct Stdout;
//!
//! impl WriteSink for Stdout {
//!     fn deliver(&mut self, chunk: Bytes) {
//!         print!("{}", String::from_utf8_lossy(&chunk));
//!     }
//!     fn finish(&mut self) {
//!         println!();
//!     }
//! }
//!
//! let source = ReadStream::new();
//! let target = WriteStream::new(Stdout);
//! pipe(&source, &target);
//!
//! source.push(Bytes::from_static(b"hello "));
//! source.push(Bytes::from_static(b"world"));
//! source.push_eof();
//! assert!(target.is_finished());
//! ```
//!
//! # Back-pressure
//!
//! `push` and `write` return an advisory keep-going boolean compared against
//! the stream's high-water mark, and writable streams fire `drain` when their
//! buffer empties. The pipe operator does not enforce the signal — end-to-end
//! flow control is a known, documented gap of this layer.

pub mod config;
pub mod error;
pub mod listener;
pub mod pipe;
pub mod readable;
pub mod runtime;
pub mod writable;

pub use config::RuntimeConfig;
pub use error::{ErrorChannel, SharedErrorChannel, StreamError};
pub use listener::{EventListeners, Listener, SharedListeners, Slot};
pub use pipe::{pipe, pipe_with, PipeErrorMode, PipeOptions};
pub use readable::ReadStream;
pub use runtime::{next_tick, Runtime, WorkGuard};
pub use writable::{WriteDone, WriteSink, WriteStream};

/// Default buffered-byte threshold above which streams signal their producer
/// to slow down. Overridable per stream and via [`config::MAX_BUFFER_ENV`].
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;
