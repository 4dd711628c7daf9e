//! The wire-codec boundary.
//!
//! This crate does not parse or frame HTTP itself. A codec is an external
//! collaborator that owns the socket bytes and exposes the connection as a
//! stream of decoded [`ProtocolEvent`]s plus a sink of [`OutboundFrame`]s; the
//! transaction layer is written entirely against those two halves.

use std::convert::Infallible;

use futures::{Sink, SinkExt, Stream};
use tokio::net::TcpStream;

use crate::protocol::{OutboundFrame, ParseError, ProtocolEvent, SendError};

/// Splits an accepted connection into its decoded-event and encoded-frame
/// halves.
///
/// One codec instance is shared by the whole server; `channel` is called once
/// per accepted connection, on the event-loop thread that will drive it.
pub trait HttpCodec: Send + Sync + 'static {
    type Events: Stream<Item = Result<ProtocolEvent, ParseError>> + Unpin + 'static;
    type Frames: Sink<OutboundFrame, Error = SendError> + Unpin + 'static;

    fn channel(&self, io: TcpStream) -> (Self::Events, Self::Frames);
}

/// Frame sink type of [`NullCodec`].
pub type NullFrames = futures::sink::SinkMapErr<futures::sink::Drain<OutboundFrame>, fn(Infallible) -> SendError>;

/// A codec that decodes nothing and discards every frame: each accepted
/// connection closes immediately. Useful for wiring tests and examples that
/// exercise the server surface without a real wire protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCodec;

impl HttpCodec for NullCodec {
    type Events = futures::stream::Empty<Result<ProtocolEvent, ParseError>>;
    type Frames = NullFrames;

    fn channel(&self, _io: TcpStream) -> (Self::Events, Self::Frames) {
        fn absurd(never: Infallible) -> SendError {
            match never {}
        }
        (futures::stream::empty(), futures::sink::drain().sink_map_err(absurd as fn(Infallible) -> SendError))
    }
}
