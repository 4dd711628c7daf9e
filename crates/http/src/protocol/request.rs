//! Request head handling.
//!
//! Wraps the standard `http::Request` type for the decoded head the external
//! codec delivers, adding the inspection helpers the transaction layer needs
//! (body expectation, `Expect` header classification).

use std::convert::Into;

use http::header::EXPECT;
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Method, Request, Uri, Version};

/// A decoded request head: method, target, version and headers, no body.
#[derive(Debug)]
pub struct RequestHead {
    inner: Request<()>,
}

/// Classification of a request's `Expect` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// `100-continue`: the client asks permission before sending its body.
    Continue,
    /// Any other expectation value; there is no default way to satisfy it.
    Other(HeaderValue),
}

impl AsRef<Request<()>> for RequestHead {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHead {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHead {
    /// Consumes the head and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Determines if this request can carry a body based on its HTTP method.
    ///
    /// Returns false for methods that typically don't have bodies:
    /// - GET
    /// - HEAD
    /// - DELETE
    /// - OPTIONS
    /// - CONNECT
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Classifies the `Expect` header, if present.
    ///
    /// Anything starting with `100-` is the continue handshake; other values
    /// are surfaced verbatim for an expectation listener to interpret.
    pub fn expectation(&self) -> Option<Expectation> {
        self.headers().get(EXPECT).map(|value| {
            let slice = value.as_bytes();
            if slice.len() >= 4 && &slice[0..4] == b"100-" {
                Expectation::Continue
            } else {
                Expectation::Other(value.clone())
            }
        })
    }
}

/// Converts request parts into a RequestHead.
impl From<Parts> for RequestHead {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

/// Converts a bodyless request into a RequestHead.
impl From<Request<()>> for RequestHead {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(builder: http::request::Builder) -> RequestHead {
        RequestHead::from(builder.body(()).unwrap())
    }

    #[test]
    fn exposes_decoded_fields() {
        let head = head(Request::builder().method(Method::GET).uri("/index.html?a=1").version(Version::HTTP_11).header(http::header::HOST, "127.0.0.1:8080"));

        assert_eq!(head.method(), &Method::GET);
        assert_eq!(head.version(), Version::HTTP_11);
        assert_eq!(head.uri().path(), "/index.html");
        assert_eq!(head.uri().query(), Some("a=1"));
        assert_eq!(head.headers().get(http::header::HOST), Some(&HeaderValue::from_static("127.0.0.1:8080")));
    }

    #[test]
    fn body_expectation_follows_method() {
        assert!(!head(Request::builder().method(Method::GET).uri("/")).need_body());
        assert!(!head(Request::builder().method(Method::HEAD).uri("/")).need_body());
        assert!(head(Request::builder().method(Method::POST).uri("/")).need_body());
        assert!(head(Request::builder().method(Method::PUT).uri("/")).need_body());
    }

    #[test]
    fn classifies_expect_header() {
        assert_eq!(head(Request::builder().uri("/")).expectation(), None);

        let cont = head(Request::builder().uri("/").header(EXPECT, "100-continue"));
        assert_eq!(cont.expectation(), Some(Expectation::Continue));

        let other = head(Request::builder().uri("/").header(EXPECT, "widget-mode"));
        assert_eq!(other.expectation(), Some(Expectation::Other(HeaderValue::from_static("widget-mode"))));
    }
}
