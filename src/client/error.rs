use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::CodecError;

/// Client error type.
///
/// Errors are cheap to clone so that one settlement can be observed by every
/// errback and by any number of waiters.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The URL could not be parsed or has no host.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The URL scheme is not supported by this build.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Host name resolution failed or returned no addresses.
    #[error("unable to resolve server address: {host}")]
    Dns {
        /// The host that failed to resolve.
        host: String,
        /// Resolver error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Connecting (resolution, TCP, proxy tunnel and TLS) took too long.
    #[error("connection timed out")]
    ConnectTimeout,

    /// No bytes arrived within the inactivity window.
    #[error("inactivity timeout")]
    InactivityTimeout,

    /// The TCP connection could not be established.
    #[error("unable to connect: {0}")]
    Connect(#[source] Arc<io::Error>),

    /// The server closed a connection before answering the request.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The server's bytes do not form a valid HTTP/1.x response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A `Location` header is absolute but has no usable host.
    #[error("Location header format error")]
    LocationFormat,

    /// The request was closed by the caller; displays the given reason.
    #[error("{0}")]
    Closed(String),

    /// Reading from or writing to the socket failed.
    #[error("transport: {0}")]
    Transport(#[source] Arc<io::Error>),

    /// The proxy refused to open a tunnel.
    #[error("proxy: {0}")]
    Proxy(String),

    /// The request body could not be read.
    #[error("request body: {0}")]
    Body(#[source] Arc<io::Error>),

    /// The response body could not be decompressed.
    #[error("content decoding: {0}")]
    Decoding(#[source] Arc<io::Error>),

    /// The TLS handshake failed.
    #[error("tls: {0}")]
    Tls(#[source] Arc<io::Error>),

    /// The task driving the request stopped before settling it.
    #[error("request aborted")]
    Aborted,
}

impl Error {
    pub(crate) fn dns<S: Into<String>>(host: S) -> impl FnOnce(io::Error) -> Self {
        move |error| Error::Dns {
            host: host.into(),
            source: Arc::new(error),
        }
    }

    pub(crate) fn connect(error: io::Error) -> Self {
        Error::Connect(Arc::new(error))
    }

    pub(crate) fn transport(error: io::Error) -> Self {
        Error::Transport(Arc::new(error))
    }

    pub(crate) fn body(error: io::Error) -> Self {
        Error::Body(Arc::new(error))
    }

    /// Whether this error came from a connect or inactivity timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ConnectTimeout | Error::InactivityTimeout)
    }

    /// Whether the request was closed by the caller.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed(_))
    }
}

impl From<CodecError> for Error {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Malformed(message) => Error::MalformedResponse(message),
            CodecError::Closed => Error::ConnectionClosed,
            CodecError::Decoding(error) => Error::Decoding(Arc::new(error)),
        }
    }
}
