use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use http::{HeaderMap, StatusCode};
use tracing::{debug, error, info, warn};

use evio_core::StreamError;

use crate::connection::FrameQueue;
use crate::message::{IncomingMessage, OutgoingMessage};
use crate::protocol::{Expectation, HttpError, OutboundFrame, ParseError, ProtocolEvent, RequestHead, SendError};
use crate::server::ServerEvents;

/// One request/response exchange in flight on a connection.
///
/// The slot is cleared exactly when *both* the response has finished and the
/// request has been fully consumed — whichever happens second. A response may
/// legitimately finish (an early redirect, a rejected expectation) while the
/// client is still sending its body; `waiting_for_request_end` marks that
/// overlay state.
#[derive(Debug)]
struct Transaction {
    id: u64,
    request: IncomingMessage,
    response: OutgoingMessage,
    waiting_for_request_end: bool,
}

#[derive(Debug)]
struct ConnState {
    transaction: Option<Transaction>,
    next_transaction_id: u64,
}

/// Per-connection transaction handler.
///
/// The `handle_*` methods are the synchronous state machine, fed decoded
/// protocol events in arrival order; [`process`](Self::process) is the async
/// driver that does exactly that against a codec's event stream while
/// draining the outbound frame queue into its sink. Embedders with their own
/// transport can skip `process` and call the handlers directly.
///
/// A connection admits at most one transaction for request ingestion at a
/// time: pipelined overlap is rejected as a protocol violation, not queued.
#[derive(Debug)]
pub struct HttpConnection {
    server: Arc<ServerEvents>,
    state: Rc<RefCell<ConnState>>,
    queue: FrameQueue,
    frames_rx: Option<tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>>,
    high_water_mark: usize,
}

impl HttpConnection {
    pub fn new(server: Arc<ServerEvents>, high_water_mark: usize) -> Self {
        let (queue, frames_rx) = FrameQueue::channel();
        Self {
            server,
            state: Rc::new(RefCell::new(ConnState { transaction: None, next_transaction_id: 1 })),
            queue,
            frames_rx: Some(frames_rx),
            high_water_mark,
        }
    }

    /// True when no transaction is in flight.
    pub fn is_idle(&self) -> bool {
        self.state.borrow().transaction.is_none()
    }

    /// Handles a decoded request head.
    ///
    /// Protocol violations (a head while a transaction is still ingesting) and
    /// a server without request listeners are connection-fatal; expectation
    /// failures only fail the transaction.
    pub fn handle_head(&self, head: RequestHead) -> Result<(), HttpError> {
        {
            let mut conn = self.state.borrow_mut();
            if let Some(stale) = conn.transaction.take() {
                error!(transaction = stale.id, "received pipelined request head, canceling transaction");
                drop(conn);
                stale.request.fail(StreamError::other("transaction canceled by overlapping request"));
                return Err(ParseError::pipelined_head(stale.id).into());
            }
        }

        if !self.server.has_request_listeners() {
            error!("no request listener registered, failing connection");
            return Err(HttpError::MissingRequestListener);
        }

        let expectation = head.expectation();
        let (id, request, response) = {
            let mut conn = self.state.borrow_mut();
            let id = conn.next_transaction_id;
            conn.next_transaction_id += 1;
            let request = IncomingMessage::new(head, self.high_water_mark);
            let response = OutgoingMessage::new(self.queue.clone(), self.high_water_mark);
            conn.transaction =
                Some(Transaction { id, request: request.clone(), response: response.clone(), waiting_for_request_end: false });
            (id, request, response)
        };
        debug!(transaction = id, method = %request.method(), uri = %request.uri(), "transaction opened");

        // completion is symmetric: whichever of response-finish and
        // request-end happens second clears the slot
        let state = Rc::clone(&self.state);
        response.once_finish(move |_| {
            let mut conn = state.borrow_mut();
            if let Some(ref mut txn) = conn.transaction {
                if txn.id != id {
                    return;
                }
                if txn.request.is_complete() {
                    conn.transaction = None;
                    debug!(transaction = id, "transaction complete");
                } else {
                    txn.waiting_for_request_end = true;
                }
            }
        });

        // the expectation is evaluated before any request listener runs
        match expectation {
            Some(Expectation::Continue) => {
                if self.server.has_continue_listeners() {
                    self.server.emit_continue(request, response);
                } else {
                    response.send_continue();
                    info!("expect request header, sent automatic continue response");
                    self.server.emit_request(request, response);
                }
            }
            Some(Expectation::Other(value)) => {
                if self.server.has_expectation_listeners() {
                    self.server.emit_expectation(request, response);
                } else {
                    warn!(expectation = ?value, "unsupported expectation, failing transaction");
                    response.write_head(StatusCode::EXPECTATION_FAILED, HeaderMap::new())?;
                    response.end();
                }
            }
            None => self.server.emit_request(request, response),
        }
        Ok(())
    }

    /// Feeds a decoded body chunk into the active request.
    pub fn handle_body(&self, chunk: Bytes) -> Result<(), HttpError> {
        let request = {
            let conn = self.state.borrow();
            match conn.transaction {
                Some(ref txn) => txn.request.clone(),
                None => return Err(ParseError::UnexpectedBody.into()),
            }
        };
        // the keep-pushing signal is advisory and not enforced at this layer
        request.push(chunk);
        Ok(())
    }

    /// Marks the active request fully received.
    pub fn handle_end(&self) -> Result<(), HttpError> {
        let request = {
            let conn = self.state.borrow();
            match conn.transaction {
                Some(ref txn) => txn.request.clone(),
                None => return Err(ParseError::UnexpectedEnd.into()),
            }
        };
        request.push_eof();

        let mut conn = self.state.borrow_mut();
        if conn.transaction.as_ref().is_some_and(|txn| txn.response.is_finished()) {
            let id = conn.transaction.take().map(|txn| txn.id);
            debug!(transaction = ?id, "transaction complete");
        }
        Ok(())
    }

    /// Surfaces a transport-level failure: on the active request if a
    /// transaction is live, otherwise on the server error channel. The
    /// connection closes either way; there is no retry at this layer.
    pub fn handle_transport_error(&self, err: &ParseError) {
        let request = self.state.borrow().transaction.as_ref().map(|txn| txn.request.clone());
        match request {
            Some(request) => {
                error!(cause = %err, "transport error, failing active request");
                request.fail(StreamError::other(err));
            }
            None => {
                error!(cause = %err, "transport error on idle connection");
                self.server.emit_error(StreamError::other(err));
            }
        }
    }

    /// Drives the connection to completion: decoded events in, frames out.
    ///
    /// Events are processed synchronously in arrival order; between events the
    /// outbound queue is drained into the codec sink (with priority, so
    /// responses flush before the next request is picked up). Returns when the
    /// peer closes or on the first connection-fatal error.
    pub async fn process<E, F>(mut self, mut events: E, mut frames: F) -> Result<(), HttpError>
    where
        E: Stream<Item = Result<ProtocolEvent, ParseError>> + Unpin,
        F: Sink<OutboundFrame, Error = SendError> + Unpin,
    {
        let mut frame_rx = self.frames_rx.take().expect("connection already processed");

        let result = loop {
            tokio::select! {
                biased;
                frame = frame_rx.recv() => {
                    // our own queue handle keeps the channel open, so recv
                    // only yields live frames here
                    if let Some(frame) = frame {
                        if let Err(e) = frames.send(frame).await {
                            break Err(e.into());
                        }
                    }
                }
                event = events.next() => match event {
                    Some(Ok(ProtocolEvent::Head(head))) => {
                        if let Err(e) = self.handle_head(head) {
                            break Err(e);
                        }
                    }
                    Some(Ok(ProtocolEvent::Body(chunk))) => {
                        if let Err(e) = self.handle_body(chunk) {
                            break Err(e);
                        }
                    }
                    Some(Ok(ProtocolEvent::End)) => {
                        if let Err(e) = self.handle_end() {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => {
                        self.handle_transport_error(&e);
                        break Err(e.into());
                    }
                    None => {
                        if self.state.borrow().transaction.is_some() {
                            self.handle_transport_error(&ParseError::invalid_body("connection closed mid transaction"));
                        } else {
                            info!("no more requests, closing connection");
                        }
                        break Ok(());
                    }
                }
            }
        };

        // flush whatever the last transaction managed to enqueue, then close
        self.state.borrow_mut().transaction = None;
        frame_rx.close();
        while let Ok(frame) = frame_rx.try_recv() {
            if frames.send(frame).await.is_err() {
                break;
            }
        }
        let _ = frames.close().await;
        result
    }
}
