use bytes::Bytes;

use crate::protocol::{RequestHead, ResponseHead};

/// A decoded inbound protocol event, as produced by the external wire codec.
///
/// One request arrives as `Head`, zero or more `Body` chunks, then `End`. The
/// connection's transaction handler consumes these in arrival order.
#[derive(Debug)]
pub enum ProtocolEvent {
    /// Request line and headers, fully decoded.
    Head(RequestHead),
    /// A chunk of decoded request body data.
    Body(Bytes),
    /// Marks the end of the current request.
    End,
}

impl ProtocolEvent {
    #[inline]
    pub fn is_head(&self) -> bool {
        matches!(self, ProtocolEvent::Head(_))
    }

    #[inline]
    pub fn is_body(&self) -> bool {
        matches!(self, ProtocolEvent::Body(_))
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        matches!(self, ProtocolEvent::End)
    }
}

/// Converts bytes directly into a body event; convenient when scripting event
/// sequences.
impl From<Bytes> for ProtocolEvent {
    fn from(bytes: Bytes) -> Self {
        Self::Body(bytes)
    }
}

/// An encoded-side write handed to the external codec.
///
/// `Continue` is the out-of-band interim head for the expect/100-continue
/// exchange; it may be written before the transaction's real head.
#[derive(Debug)]
pub enum OutboundFrame {
    /// Response status line and headers, plus how the body will be framed.
    Head(ResponseHead, PayloadSize),
    /// A chunk of response body data.
    Body(Bytes),
    /// Marks the end of the current response.
    End,
    /// An interim `100 Continue` head.
    Continue,
}

impl OutboundFrame {
    #[inline]
    pub fn is_head(&self) -> bool {
        matches!(self, OutboundFrame::Head(..))
    }

    #[inline]
    pub fn is_body(&self) -> bool {
        matches!(self, OutboundFrame::Body(_))
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        matches!(self, OutboundFrame::End)
    }

    #[inline]
    pub fn is_continue(&self) -> bool {
        matches!(self, OutboundFrame::Continue)
    }
}

/// Size information for an outbound payload, steering how the codec frames it:
/// known length, chunked transfer, or no body at all.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Payload with known length in bytes
    Length(u64),
    /// Payload using chunked transfer encoding
    Chunked,
    /// Empty payload (no body)
    Empty,
}

impl PayloadSize {
    /// Returns true if the payload uses chunked transfer encoding
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    /// Returns true if the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}
