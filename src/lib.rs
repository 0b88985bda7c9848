//! zhttp
//!
//! An asynchronous HTTP/1.x client engine built on tokio.
//!
//! Requests are issued from an [`HttpConnection`] handle created through a
//! [`Context`]. Each request returns an [`HttpClient`] handle which settles
//! exactly once, either running its callbacks with the [`Response`] or its
//! errbacks with an [`Error`]. Connections are pooled per endpoint and
//! keepalive requests are pipelined, while completion order always matches
//! submission order.
//!
//! ```no_run
//! # async fn run() -> Result<(), zhttp::Error> {
//! let context = zhttp::Context::new();
//! let connection = context.connection("http://127.0.0.1:8080/", Default::default())?;
//!
//! let client = connection.get(zhttp::RequestOptions::new().redirects(2));
//! client.callback(|response| println!("{}", response.header().status()));
//!
//! let response = client.finish().await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;

pub mod client;
pub mod codec;
pub mod context;
pub mod cookie;
pub mod deferred;
pub mod middleware;
pub mod multi;
pub(crate) mod uri;

pub use client::{
    ConnectionOptions, Error, HttpClient, HttpConnection, Proxy, RequestOptions, Response,
};
pub use codec::{Body, FormValue, HeaderValue, Headers, Query, ResponseHeader};
pub use context::Context;
pub use deferred::Deferred;
pub use middleware::Middleware;
pub use multi::MultiRequest;

/// Boxed error used at the seams where arbitrary errors are accepted.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Product identifier sent as `User-Agent` when the caller does not set one.
pub const DEFAULT_USER_AGENT: &str = "zhttp HttpClient";

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
