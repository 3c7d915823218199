use std::time::Duration;

use thiserror::Error;

use crate::BoxError;

/// Request error type.
///
/// Every failure is surfaced through the future which was awaited when it happened
/// (the request handle, [`Finalized`][crate::request::Finalized], a
/// [`Collector`][crate::collector::Collector], or one of the
/// [`Response`][crate::response::Response] consumption methods). Nothing is retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request URL uses a scheme with no available transport.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// A request header name or value was invalid.
    #[error("invalid header: {0}")]
    InvalidHeader(#[source] http::Error),

    /// The request could not be assembled from its parts.
    #[error("invalid request: {0}")]
    Request(#[source] http::Error),

    /// A JSON request body could not be serialized.
    #[error("json encode: {0}")]
    Encode(#[source] serde_json::Error),

    /// The transport failed before or during the exchange.
    #[error("connection: {0}")]
    Connection(#[source] BoxError),

    /// The exchange was aborted.
    #[error("request aborted")]
    Aborted,

    /// No response arrived within the configured duration.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The request body source failed while it was being sent.
    #[error("upload: {0}")]
    Upload(#[source] BoxError),

    /// The exchange ended before the whole request body was handed to the transport.
    #[error("request body was not fully written")]
    Incomplete,

    /// The request body was already finalized.
    #[error("request body is closed")]
    BodyClosed,

    /// The response body failed while it was being read.
    #[error("body read: {0}")]
    BodyRead(#[source] BoxError),

    /// Writing the response body to a destination failed.
    #[error("write: {0}")]
    Write(#[source] std::io::Error),

    /// The collected body could not be parsed.
    #[error("parse: {0}")]
    Parse(#[source] BoxError),

    /// The response body was already drained.
    #[error("response body already consumed")]
    Consumed,

    /// The request outcome was already delivered.
    #[error("request already settled")]
    Settled,
}

impl Error {
    /// True if the exchange was aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// True if the exchange timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// True if the failure came from parsing a collected body.
    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Parse(_))
    }

    pub(crate) fn connection<E: Into<BoxError>>(error: E) -> Self {
        Error::Connection(error.into())
    }
}

impl From<Error> for std::io::Error {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::BodyClosed | Error::Consumed | Error::Settled => std::io::ErrorKind::BrokenPipe,
            Error::Timeout(_) => std::io::ErrorKind::TimedOut,
            Error::Aborted => std::io::ErrorKind::ConnectionAborted,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, error)
    }
}
