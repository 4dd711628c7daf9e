//! The readable half of a transaction: one decoded request.
//!
//! An `IncomingMessage` pairs the decoded [`RequestHead`] with a
//! [`ReadStream`] carrying the body bytes, plus the per-message environment.
//! The transaction handler is the producer (it pushes decoded body events);
//! application listeners consume through the usual readable-stream surface.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use serde_json::Value;

use evio_core::{Listener, ReadStream, StreamError};

use crate::message::Env;
use crate::protocol::{Expectation, RequestHead};

#[derive(Debug)]
struct IncomingShared {
    head: RequestHead,
    body: ReadStream,
    env: RefCell<Env>,
}

/// One in-flight request. Handles are cheap clones sharing the same state.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    shared: Rc<IncomingShared>,
}

impl IncomingMessage {
    pub(crate) fn new(head: RequestHead, high_water_mark: usize) -> Self {
        Self {
            shared: Rc::new(IncomingShared {
                head,
                body: ReadStream::with_high_water_mark(high_water_mark),
                env: RefCell::new(Env::new()),
            }),
        }
    }

    pub fn head(&self) -> &RequestHead {
        &self.shared.head
    }

    pub fn method(&self) -> &Method {
        self.shared.head.method()
    }

    pub fn uri(&self) -> &Uri {
        self.shared.head.uri()
    }

    pub fn version(&self) -> Version {
        self.shared.head.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.shared.head.headers()
    }

    pub fn expectation(&self) -> Option<Expectation> {
        self.shared.head.expectation()
    }

    /// True once the request has been fully received (its `end` delivered).
    pub fn is_complete(&self) -> bool {
        self.shared.body.is_ended()
    }

    // --- body stream surface ---

    pub fn read(&self, count: Option<usize>) -> Option<Bytes> {
        self.shared.body.read(count)
    }

    pub fn on_data<F>(&self, callback: F) -> Listener
    where
        F: Fn(Bytes) + 'static,
    {
        self.shared.body.on_data(callback)
    }

    pub fn once_data<F>(&self, callback: F) -> Listener
    where
        F: Fn(Bytes) + 'static,
    {
        self.shared.body.once_data(callback)
    }

    pub fn on_readable<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.body.on_readable(callback)
    }

    pub fn on_end<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.body.on_end(callback)
    }

    pub fn once_end<F>(&self, callback: F) -> Listener
    where
        F: Fn(()) + 'static,
    {
        self.shared.body.once_end(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(StreamError) + 'static,
    {
        self.shared.body.on_error(callback)
    }

    /// The underlying readable body stream, for piping into a writable.
    pub fn body(&self) -> &ReadStream {
        &self.shared.body
    }

    // --- environment side channel ---

    /// Attaches a value to this message's environment.
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

    // --- producer side, driven by the transaction handler ---

    pub(crate) fn push(&self, chunk: Bytes) -> bool {
        self.shared.body.push(chunk)
    }

    pub(crate) fn push_eof(&self) {
        self.shared.body.push_eof();
    }

    /// Surfaces a transport-level failure on this request's error channel.
    pub(crate) fn fail(&self, err: StreamError) {
        self.shared.body.emit_error(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use std::cell::RefCell as StdRefCell;

    fn message(uri: &str) -> IncomingMessage {
        let head = RequestHead::from(Request::builder().method(Method::POST).uri(uri).body(()).unwrap());
        IncomingMessage::new(head, 16 * 1024)
    }

    #[test]
    fn exposes_head_and_streams_body() {
        let msg = message("/upload");
        assert_eq!(msg.method(), &Method::POST);
        assert_eq!(msg.uri().path(), "/upload");
        assert!(!msg.is_complete());

        msg.push(Bytes::from_static(b"abc"));
        msg.push(Bytes::from_static(b"def"));
        assert_eq!(msg.read(None).unwrap(), Bytes::from_static(b"abcdef"));

        msg.push_eof();
        assert!(msg.is_complete());
    }

    #[test]
    fn clones_share_state() {
        let msg = message("/");
        let other = msg.clone();

        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        other.on_data(move |b| sink.borrow_mut().push(b));

        msg.push(Bytes::from_static(b"shared"));
        assert_eq!(*seen.borrow(), vec![Bytes::from_static(b"shared")]);

        msg.env_insert("id", 7);
        assert_eq!(other.env_get("id"), Some(Value::from(7)));
    }
}
