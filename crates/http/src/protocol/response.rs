//! Response head handling.
//!
//! The outbound head is the standard `http::Response` type with an empty body
//! placeholder; body bytes travel separately as outbound frames.

use http::Response;

/// Type alias for HTTP response heads.
pub type ResponseHead = Response<()>;
