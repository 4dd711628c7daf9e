//! Incoming and outgoing messages.
//!
//! One transaction pairs an [`IncomingMessage`] (the decoded request: head
//! metadata plus a readable body stream) with an [`OutgoingMessage`] (the
//! response under construction: staged head plus a writable body stream).
//! Both carry an [`Env`] side channel for per-message application metadata.

mod env;
mod incoming;
mod outgoing;

pub use env::Env;
pub use incoming::IncomingMessage;
pub use outgoing::OutgoingMessage;
