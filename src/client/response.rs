use std::borrow::Cow;
use std::net::IpAddr;

use bytes::Bytes;
use url::Url;

use crate::codec::ResponseHeader;

/// A completed response, as delivered to callbacks.
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) header: ResponseHeader,
    pub(crate) body: Bytes,
    pub(crate) url: Url,
    pub(crate) redirects: u32,
    pub(crate) cookies: Vec<String>,
    pub(crate) peer: Option<IpAddr>,
}

impl Response {
    /// Status line and header fields.
    pub fn header(&self) -> &ResponseHeader {
        &self.header
    }

    /// Status code.
    pub fn status(&self) -> u16 {
        self.header.status()
    }

    /// Buffered body. Empty when the body was delivered to stream handlers.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// URL of the final hop.
    pub fn last_effective_url(&self) -> &Url {
        &self.url
    }

    /// Redirects followed to reach this response.
    pub fn redirects(&self) -> u32 {
        self.redirects
    }

    /// Cookies sent with the final hop.
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    /// Address of the server that answered.
    pub fn peer(&self) -> Option<IpAddr> {
        self.peer
    }

    /// Split into head and body.
    pub fn into_parts(self) -> (ResponseHeader, Bytes) {
        (self.header, self.body)
    }
}
