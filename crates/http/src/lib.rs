//! An evented HTTP server surface over an external wire codec
//!
//! This crate provides the application-facing half of an HTTP server in the
//! evented, callback-driven style of `evio-core`: incoming/outgoing messages
//! built on readable/writable streams, a per-connection transaction state
//! machine, and a server object with request/continue/expectation listener
//! registries.
//!
//! It deliberately contains no parser and no framing code. The wire protocol
//! is an external collaborator behind the [`protocol::HttpCodec`] trait: the
//! codec decodes socket bytes into head/body/end events and encodes the
//! head/body/end frames this crate produces. Everything here is written
//! against that event boundary.
//!
//! # Features
//!
//! - Node-style `on_request(req, res)` server surface
//! - Streaming request and response bodies over evented streams
//! - One transaction in flight per connection, with symmetric completion
//!   (response-finish and request-end in either order)
//! - Expect/100-continue handling, automatic or listener-driven
//! - Keep-alive: transactions loop on one connection until the peer closes
//! - Event-loop thread pool with per-connection thread affinity
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use evio_core::Runtime;
//! use evio_http::protocol::NullCodec;
//! use evio_http::server::Server;
//! use tracing::Level;
//! use tracing_subscriber::FmtSubscriber;
//!
//! // Initialize logging
//! let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//! tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//! let runtime = Arc::new(Runtime::from_env());
//!
//! // NullCodec stands in for a real wire codec here; plug in an HTTP/1.1
//! // codec to serve actual traffic.
//! let server = Server::new(Arc::clone(&runtime), NullCodec);
//!
//! server.on_request(|request, response| {
//!     tracing::info!(path = %request.uri().path(), "incoming request");
//!     response.write(Bytes::from_static(b"Hello World!\r\n"), None);
//!     response.end();
//! });
//!
//! server.listen(8080, "127.0.0.1", 1024).expect("listen failed");
//! runtime.block_until_idle();
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`protocol`]: the codec boundary — event/frame types, head wrappers,
//!   error taxonomy
//! - [`message`]: [`message::IncomingMessage`] and
//!   [`message::OutgoingMessage`], the per-transaction stream pair
//! - [`connection`]: [`connection::HttpConnection`], the per-connection
//!   transaction state machine and its async driver
//! - [`server`]: [`server::Server`] and its listener registries
//!
//! # Concurrency model
//!
//! All events for one connection are serialized onto one event-loop thread;
//! per-connection state (stream buffers, the transaction slot) is therefore
//! single-threaded and lock-free. The server-level registries are the only
//! cross-thread state and live behind locks. Process lifetime is tracked by
//! the runtime's work counter: listening sockets and live connections hold
//! work guards, and `block_until_idle` returns once nothing is left.
//!
//! # Error handling
//!
//! Four failure classes, handled per their blast radius:
//!
//! - stream-state errors (writing an ended response): recoverable, emitted on
//!   the narrowest error channel
//! - protocol-sequencing errors (pipelined heads, body without transaction):
//!   connection-fatal, the framing can no longer be trusted
//! - handler absence (no request listener, unsupported expectation): fails
//!   the transaction or connection, never the server
//! - transport errors: surfaced on the active request when there is one,
//!   otherwise on the server channel; the connection closes either way
//!
//! # Limitations
//!
//! - No TLS (terminate upstream)
//! - Back-pressure is advisory end to end
//! - Pipelined request overlap is rejected, not queued

pub mod connection;
pub mod message;
pub mod protocol;
pub mod server;

mod utils;
