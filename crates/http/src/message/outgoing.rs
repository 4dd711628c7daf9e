//! The writable half of a transaction: one response under construction.
//!
//! An `OutgoingMessage` stages the response head (status + headers) and owns a
//! [`WriteStream`] whose sink turns stream payloads into outbound frames. The
//! head is emitted lazily: the first body write (or `end`) flushes it, with an
//! implicit `200 OK` when the handler never staged one — so
//! `res.end(b"hi")`-style shorthand works without ceremony.
//!
//! Body framing is chosen from the staged headers: an explicit
//! `Content-Length` yields a known-length payload, otherwise the codec is told
//! to use chunked transfer; a response ended without any body writes is
//! emitted as head-only.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use serde_json::Value;

use evio_core::{Listener, StreamError, WriteDone, WriteSink, WriteStream};

use crate::connection::FrameQueue;
use crate::message::Env;
use crate::protocol::{OutboundFrame, PayloadSize, SendError};
use crate::utils::ensure;

#[derive(Debug)]
struct HeadState {
    status: StatusCode,
    headers: HeaderMap,
    sent: bool,
}

impl HeadState {
    /// Emits the staged head if it has not gone out yet. `streaming` tells us
    /// whether body bytes are about to follow.
    fn flush(&mut self, queue: &FrameQueue, streaming: bool) {
        if self.sent {
            return;
        }
        self.sent = true;

        let declared_length = self
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let payload_size = match declared_length {
            Some(length) => PayloadSize::Length(length),
            None if streaming => PayloadSize::Chunked,
            None => PayloadSize::Empty,
        };

        let mut head = Response::builder().status(self.status).body(()).unwrap();
        *head.headers_mut() = std::mem::take(&mut self.headers);
        queue.push(OutboundFrame::Head(head, payload_size));
    }
}

/// Bridges the writable stream onto the connection's outbound frame queue.
#[derive(Debug)]
struct FrameSink {
    queue: FrameQueue,
    head: Rc<RefCell<HeadState>>,
}

impl WriteSink for FrameSink {
    fn deliver(&mut self, chunk: Bytes) {
        self.head.borrow_mut().flush(&self.queue, true);
        self.queue.push(OutboundFrame::Body(chunk));
    }

    fn finish(&mut self) {
        self.head.borrow_mut().flush(&self.queue, false);
        self.queue.push(OutboundFrame::End);
    }
}

#[derive(Debug)]
struct OutgoingShared {
    head: Rc<RefCell<HeadState>>,
    body: WriteStream,
    queue: FrameQueue,
    env: RefCell<Env>,
}

/// One in-flight response. Handles are cheap clones sharing the same state.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    shared: Rc<OutgoingShared>,
}

impl OutgoingMessage {
    pub(crate) fn new(queue: FrameQueue, high_water_mark: usize) -> Self {
        let head = Rc::new(RefCell::new(HeadState { status: StatusCode::OK, headers: HeaderMap::new(), sent: false }));
        let sink = FrameSink { queue: queue.clone(), head: Rc::clone(&head) };
        Self {
            shared: Rc::new(OutgoingShared {
                head,
                body: WriteStream::with_high_water_mark(sink, high_water_mark),
                queue,
                env: RefCell::new(Env::new()),
            }),
        }
    }

    /// Stages the response status and headers. Fails once the head has been
    /// written to the wire (triggered by the first body write or by `end`).
    pub fn write_head(&self, status: StatusCode, headers: HeaderMap) -> Result<(), SendError> {
        let mut head = self.shared.head.borrow_mut();
        ensure!(!head.sent, SendError::HeadAlreadySent);
        head.status = status;
        head.headers.extend(headers);
        Ok(())
    }

    /// Stages a single response header.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) -> Result<(), SendError> {
        let mut head = self.shared.head.borrow_mut();
        ensure!(!head.sent, SendError::HeadAlreadySent);
        head.headers.insert(name, value);
        Ok(())
    }

    pub fn status(&self) -> StatusCode {
        self.shared.head.borrow().status
    }

    /// True once the head frame has been handed to the codec.
    pub fn head_sent(&self) -> bool {
        self.shared.head.borrow().sent
    }

    /// Writes an interim `100 Continue` head, out of band with the staged
    /// response head.
    pub fn send_continue(&self) {
        self.shared.queue.push(OutboundFrame::Continue);
    }

    // --- body stream surface ---

    /// Writes a body chunk; flushes the (possibly implicit `200 OK`) head
    /// first if it has not gone out yet. See [`WriteStream::write`] for the
    /// completion and keep-writing contract.
    pub fn write(&self, chunk: Bytes, done: Option<WriteDone>) -> bool {
        self.shared.body.write(chunk, done)
    }

    pub fn cork(&self) {
        self.shared.body.cork();
    }

    pub fn uncork(&self) {
        self.shared.body.uncork();
    }

    /// Ends the response: flushes the head if needed and emits the end frame.
    /// Idempotent.
    pub fn end(&self) {
        self.shared.body.end();
    }

    pub fn is_ended(&self) -> bool {
        self.shared.body.is_ended()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.body.is_finished()
    }

    pub fn on_finish<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.body.on_finish(callback)
    }

    pub fn once_finish<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.body.once_finish(callback)
    }

    pub fn on_drain<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.body.on_drain(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(StreamError) + 'static,
    {
        self.shared.body.on_error(callback)
    }

    /// The underlying writable body stream, for use as a pipe target.
    pub fn body(&self) -> &WriteStream {
        &self.shared.body
    }

    // --- environment side channel ---

    pub fn env_insert<K, V>(&self, key: K, value: V) -> Option<Value>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.shared.env.borrow_mut().insert(key, value)
    }

    pub fn env_get(&self, key: &str) -> Option<Value> {
        self.shared.env.borrow().get(key).cloned()
    }

    pub fn env_remove(&self, key: &str) -> Option<Value> {
        self.shared.env.borrow_mut().remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(rx: &mut tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn first_write_flushes_implicit_ok_head_as_chunked() {
        let (queue, mut rx) = FrameQueue::channel();
        let response = OutgoingMessage::new(queue, 16 * 1024);

        response.write(Bytes::from_static(b"hi"), None);
        response.end();

        let frames = collect(&mut rx);
        assert_eq!(frames.len(), 3);
        let OutboundFrame::Head(ref head, size) = frames[0] else { panic!("expected head frame") };
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(size, PayloadSize::Chunked);
        assert!(matches!(frames[1], OutboundFrame::Body(ref b) if b.as_ref() == b"hi"));
        assert!(frames[2].is_end());
    }

    #[test]
    fn staged_content_length_selects_known_length_framing() {
        let (queue, mut rx) = FrameQueue::channel();
        let response = OutgoingMessage::new(queue, 16 * 1024);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
        response.write_head(StatusCode::CREATED, headers).unwrap();
        response.write(Bytes::from_static(b"hello"), None);
        response.end();

        let frames = collect(&mut rx);
        let OutboundFrame::Head(ref head, size) = frames[0] else { panic!("expected head frame") };
        assert_eq!(head.status(), StatusCode::CREATED);
        assert_eq!(head.headers().get(CONTENT_LENGTH), Some(&HeaderValue::from_static("5")));
        assert_eq!(size, PayloadSize::Length(5));
    }

    #[test]
    fn end_without_body_emits_empty_head_then_end() {
        let (queue, mut rx) = FrameQueue::channel();
        let response = OutgoingMessage::new(queue, 16 * 1024);

        response.write_head(StatusCode::NO_CONTENT, HeaderMap::new()).unwrap();
        response.end();
        // a second end is a no-op
        response.end();

        let frames = collect(&mut rx);
        assert_eq!(frames.len(), 2);
        let OutboundFrame::Head(ref head, size) = frames[0] else { panic!("expected head frame") };
        assert_eq!(head.status(), StatusCode::NO_CONTENT);
        assert_eq!(size, PayloadSize::Empty);
        assert!(frames[1].is_end());
    }

    #[test]
    fn write_head_after_flush_is_rejected() {
        let (queue, mut rx) = FrameQueue::channel();
        let response = OutgoingMessage::new(queue, 16 * 1024);

        response.write(Bytes::from_static(b"body"), None);
        assert!(response.head_sent());

        let result = response.write_head(StatusCode::IM_A_TEAPOT, HeaderMap::new());
        assert!(matches!(result, Err(SendError::HeadAlreadySent)));
        // status on the wire stayed 200
        let frames = collect(&mut rx);
        let OutboundFrame::Head(ref head, _) = frames[0] else { panic!("expected head frame") };
        assert_eq!(head.status(), StatusCode::OK);
    }

    #[test]
    fn continue_frame_goes_out_before_the_real_head() {
        let (queue, mut rx) = FrameQueue::channel();
        let response = OutgoingMessage::new(queue, 16 * 1024);

        response.send_continue();
        response.end();

        let frames = collect(&mut rx);
        assert!(frames[0].is_continue());
        assert!(frames[1].is_head());
        assert!(frames[2].is_end());
    }

    #[test]
    fn corked_writes_flush_in_order_on_end() {
        let (queue, mut rx) = FrameQueue::channel();
        let response = OutgoingMessage::new(queue, 16 * 1024);

        response.cork();
        response.write(Bytes::from_static(b"a"), None);
        response.write(Bytes::from_static(b"b"), None);
        assert!(collect(&mut rx).is_empty());

        response.end();
        let frames = collect(&mut rx);
        assert!(frames[0].is_head());
        assert!(matches!(frames[1], OutboundFrame::Body(ref b) if b.as_ref() == b"a"));
        assert!(matches!(frames[2], OutboundFrame::Body(ref b) if b.as_ref() == b"b"));
        assert!(frames[3].is_end());
    }
}
