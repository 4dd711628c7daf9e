//! Protocol boundary types and errors.
//!
//! This module defines the contract between the transaction layer and the
//! external wire codec, plus the head types both sides share:
//!
//! - **Inbound events**: [`ProtocolEvent`] — decoded head/body/end
//!   notifications, consumed in arrival order
//! - **Outbound frames**: [`OutboundFrame`] — head/body/end (and the
//!   out-of-band continue) writes handed to the codec, with [`PayloadSize`]
//!   steering body framing
//! - **Heads**: [`RequestHead`] and [`ResponseHead`], thin wrappers over the
//!   `http` crate's request/response types
//! - **Codec contract**: the [`HttpCodec`] trait splitting an accepted
//!   connection into those two halves
//! - **Errors**: [`ParseError`] for the inbound half (codec failures and
//!   protocol-sequencing violations), [`SendError`] for the outbound half,
//!   joined under [`HttpError`]
//!
//! Nothing in here touches raw socket bytes; parsing and framing are the
//! codec's problem by design.

mod codec;
mod error;
mod event;
mod request;
mod response;

pub use codec::{HttpCodec, NullCodec, NullFrames};
pub use error::{HttpError, ParseError, SendError};
pub use event::{OutboundFrame, PayloadSize, ProtocolEvent};
pub use request::{Expectation, RequestHead};
pub use response::ResponseHead;
