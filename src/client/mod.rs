//! HTTP/1.x client.
//!
//! An [`HttpConnection`] is bound to a base URL and a set of
//! [`ConnectionOptions`]. Each request method returns an [`HttpClient`]
//! handle immediately; the request itself runs on the tokio runtime and
//! settles the handle once:
//!
//! 1. the request is built from [`RequestOptions`], the context's cookie jar
//!    and default headers, then passed through request middleware,
//! 2. it is serialized and queued on the connection for its endpoint,
//! 3. the response is decoded, cookies are recorded and response middleware
//!    runs,
//! 4. redirects are followed while the budget allows, repeating from (1).
//!
//! Connections are per endpoint and per [`HttpConnection`], so redirects to
//! another host open a second socket while repeated requests to the same
//! host share one.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use http::Method;
use parking_lot::RwLock;
use tracing::Instrument as _;
use url::Url;

use self::conn::ConnectionManager;
use self::request::RequestClient;
use crate::context::Context;
use crate::middleware::{Middleware, Pipeline};
use crate::uri;

pub mod conn;
mod error;
mod handle;
mod options;
mod redirect;
mod request;
mod response;

pub use self::error::Error;
pub use self::handle::HttpClient;
pub use self::options::{ConnectionOptions, Proxy, RequestOptions};
pub use self::response::Response;

/// Requests against one base URL.
///
/// Cloning is cheap; clones share connections and middleware.
#[derive(Clone)]
pub struct HttpConnection {
    inner: Arc<ConnectionRef>,
}

pub(crate) struct ConnectionRef {
    pub(crate) context: Context,
    pub(crate) url: Url,
    pub(crate) options: Arc<ConnectionOptions>,
    /// Context middleware as it was when the connection was created.
    pub(crate) global: Pipeline,
    pub(crate) middleware: RwLock<Pipeline>,
    pub(crate) manager: ConnectionManager,
}

impl ConnectionRef {
    /// Context middleware followed by this connection's own.
    pub(crate) fn pipeline(&self) -> Pipeline {
        self.global.chain(&self.middleware.read())
    }
}

impl fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection")
            .field("url", &self.inner.url.as_str())
            .field("options", &self.inner.options)
            .field("global", &self.inner.global)
            .field("middleware", &*self.inner.middleware.read())
            .finish()
    }
}

impl HttpConnection {
    pub(crate) fn new(
        context: Context,
        url: Url,
        options: ConnectionOptions,
        global: Pipeline,
    ) -> Result<Self, Error> {
        #[cfg(not(feature = "tls"))]
        if url.scheme() == "https" {
            return Err(Error::UnsupportedScheme("https".into()));
        }

        Ok(Self {
            inner: Arc::new(ConnectionRef {
                context,
                url,
                options: Arc::new(options),
                global,
                middleware: RwLock::new(Pipeline::default()),
                manager: ConnectionManager::new(),
            }),
        })
    }

    /// Register middleware for requests made through this connection. It runs
    /// after middleware registered on the context.
    pub fn use_middleware<M: Middleware>(&self, middleware: M) -> &Self {
        self.inner.middleware.write().register(Arc::new(middleware));
        self
    }

    /// Send a `GET` request.
    pub fn get(&self, options: RequestOptions) -> HttpClient {
        self.request(Method::GET, options)
    }

    /// Send a `HEAD` request.
    pub fn head(&self, options: RequestOptions) -> HttpClient {
        self.request(Method::HEAD, options)
    }

    /// Send a `DELETE` request.
    pub fn delete(&self, options: RequestOptions) -> HttpClient {
        self.request(Method::DELETE, options)
    }

    /// Send a `PUT` request.
    pub fn put(&self, options: RequestOptions) -> HttpClient {
        self.request(Method::PUT, options)
    }

    /// Send a `POST` request.
    pub fn post(&self, options: RequestOptions) -> HttpClient {
        self.request(Method::POST, options)
    }

    /// Send a `PATCH` request.
    pub fn patch(&self, options: RequestOptions) -> HttpClient {
        self.request(Method::PATCH, options)
    }

    /// Send an `OPTIONS` request.
    pub fn options(&self, options: RequestOptions) -> HttpClient {
        self.request(Method::OPTIONS, options)
    }

    /// Send a request with any method.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request(&self, method: Method, options: RequestOptions) -> HttpClient {
        let url =
            uri::with_request(&self.inner.url, options.path.as_deref(), options.query.as_ref());
        let client = HttpClient::new(method.clone(), url.clone());

        let span = tracing::debug_span!("request", %method, %url);
        let driver = RequestClient::new(client.clone(), self.inner.clone(), method, options, url);
        tokio::spawn(driver.run().instrument(span));

        client
    }

    /// Address of the server most recently connected to, if any.
    pub fn peer(&self) -> Option<IpAddr> {
        self.inner.manager.peer().map(|addr| addr.ip())
    }

    /// Close every connection, failing outstanding requests with
    /// [`Error::Closed`].
    pub fn close(&self, reason: impl AsRef<str>) {
        self.inner.manager.close(reason.as_ref());
    }

    /// The base URL.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Connection options.
    pub fn connection_options(&self) -> &ConnectionOptions {
        &self.inner.options
    }
}
