//! Process-wide client state.
//!
//! A [`Context`] holds what requests share: global middleware, the cookie
//! jar, the DNS resolver and the default `User-Agent`. Connections created
//! from a context take a snapshot of its middleware at creation time, so
//! middleware registered later only applies to connections created later.

use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tower::util::BoxCloneService;

use crate::client::conn::{GaiResolver, Resolver, SocketAddrs};
use crate::client::{ConnectionOptions, Error, HttpConnection};
use crate::cookie::CookieJar;
use crate::middleware::{Middleware, Pipeline};
use crate::{uri, DEFAULT_USER_AGENT};

/// Shared client state. Cloning is cheap.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextRef>,
}

struct ContextRef {
    middleware: RwLock<Pipeline>,
    cookies: Mutex<CookieJar>,
    resolver: Mutex<Resolver>,
    user_agent: String,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("middleware", &*self.inner.middleware.read())
            .field("cookies", &self.inner.cookies.lock().len())
            .field("user_agent", &self.inner.user_agent)
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A context using the system resolver.
    pub fn new() -> Self {
        Builder::new().build()
    }

    /// Configure a context.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Register middleware for every connection created from now on.
    pub fn use_middleware<M: Middleware>(&self, middleware: M) -> &Self {
        self.inner.middleware.write().register(Arc::new(middleware));
        self
    }

    /// The cookie jar shared by all requests of this context.
    pub fn cookie_jar(&self) -> MutexGuard<'_, CookieJar> {
        self.inner.cookies.lock()
    }

    /// Forget global middleware and cookies.
    pub fn reset(&self) {
        self.inner.middleware.write().clear();
        self.inner.cookies.lock().clear();
    }

    /// Default `User-Agent` value.
    pub fn user_agent(&self) -> &str {
        &self.inner.user_agent
    }

    /// Create a connection to `url`.
    ///
    /// Fails immediately for a URL that does not parse, has no host, or uses
    /// a scheme other than `http` or `https`.
    pub fn connection(
        &self,
        url: &str,
        options: ConnectionOptions,
    ) -> Result<HttpConnection, Error> {
        let url = uri::parse(url)?;
        let middleware = self.inner.middleware.read().clone();
        HttpConnection::new(self.clone(), url, options, middleware)
    }

    pub(crate) fn resolver(&self) -> Resolver {
        self.inner.resolver.lock().clone()
    }
}

/// Builder for a [`Context`].
pub struct Builder {
    resolver: Resolver,
    user_agent: String,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Defaults: the system resolver and the crate's `User-Agent`.
    pub fn new() -> Self {
        Self {
            resolver: BoxCloneService::new(GaiResolver::new()),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    /// Resolve host names with a custom service.
    pub fn with_resolver<R>(mut self, resolver: R) -> Self
    where
        R: tower::Service<Box<str>, Response = SocketAddrs, Error = io::Error>
            + Clone
            + Send
            + 'static,
        R::Future: Send + 'static,
    {
        self.resolver = BoxCloneService::new(resolver);
        self
    }

    /// Resolve host names with `getaddrinfo`.
    pub fn with_gai_resolver(self) -> Self {
        self.with_resolver(GaiResolver::new())
    }

    /// Default `User-Agent` for requests that do not set one.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the context.
    pub fn build(self) -> Context {
        Context {
            inner: Arc::new(ContextRef {
                middleware: RwLock::new(Pipeline::default()),
                cookies: Mutex::new(CookieJar::new()),
                resolver: Mutex::new(self.resolver),
                user_agent: self.user_agent,
            }),
        }
    }
}
