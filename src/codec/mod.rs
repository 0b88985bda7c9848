//! HTTP/1.x message codec.
//!
//! Requests are serialized from [`Headers`] and a [`Body`] into a head and a
//! body source. Responses are parsed incrementally by a
//! [`ResponseDecoder`](decode::ResponseDecoder) into a [`ResponseHeader`]
//! and body chunks, with `gzip` and `deflate` content decoding applied on
//! the fly.

use std::io;

use thiserror::Error;

mod content;
pub mod decode;
pub mod form;
pub mod request;
pub mod response;

pub use self::decode::{Decoded, ResponseDecoder};
pub use self::form::FormValue;
pub use self::request::{Body, HeaderValue, Headers, Query};
pub use self::response::ResponseHeader;

/// Errors produced while decoding a response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The bytes received are not a valid HTTP/1.x response.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The peer closed the connection before sending any part of a response.
    #[error("connection closed by server")]
    Closed,

    /// The body could not be decompressed.
    #[error("content decoding failed: {0}")]
    Decoding(#[source] io::Error),
}
