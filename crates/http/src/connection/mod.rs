//! HTTP connection handling.
//!
//! [`HttpConnection`] is the per-connection transaction handler: it consumes
//! the decoded protocol events of one connection in arrival order, sequences
//! them into request/response transactions, and emits outbound frames. One
//! connection is owned by exactly one event-loop thread, so the state machine
//! is synchronous and lock-free; all asynchrony lives in the
//! [`process`](HttpConnection::process) driver that pairs the codec's event
//! stream with the outbound frame queue.

mod http_connection;

pub use http_connection::HttpConnection;

use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::OutboundFrame;

/// Handle for enqueueing outbound frames onto a connection.
///
/// Clones share the same queue; the connection's driver drains it into the
/// codec sink. Pushing after the connection is gone drops the frame with a
/// warning — there is nobody left to deliver to.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    sender: mpsc::UnboundedSender<OutboundFrame>,
}

impl FrameQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn push(&self, frame: OutboundFrame) {
        if self.sender.send(frame).is_err() {
            warn!("connection writer is gone, dropping response frame");
        }
    }
}
