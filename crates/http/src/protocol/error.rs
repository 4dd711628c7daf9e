use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("no request listener registered")]
    MissingRequestListener,
}

/// Errors on the inbound half of a connection: reported by the external codec
/// (invalid framing, io) or raised here when the decoded event sequence
/// violates the transaction protocol.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid head: {reason}")]
    InvalidHead { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("received request head while transaction {id} is still in flight")]
    PipelinedHead { id: u64 },

    #[error("received body data without an active transaction")]
    UnexpectedBody,

    #[error("received end of message without an active transaction")]
    UnexpectedEnd,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn invalid_head<S: ToString>(str: S) -> Self {
        Self::InvalidHead { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn pipelined_head(id: u64) -> Self {
        Self::PipelinedHead { id }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors on the outbound half: rejected head staging or codec write failures.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("response head already sent")]
    HeadAlreadySent,

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
