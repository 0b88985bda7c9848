//! Connection and request configuration.

use std::path::PathBuf;
use std::time::Duration;

use super::conn::TcpConfig;
use crate::codec::{Body, FormValue, HeaderValue, Headers, Query};

/// Configuration shared by every request made through one
/// [`HttpConnection`](crate::HttpConnection).
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Bound on resolution, TCP connect, proxy tunnel and TLS handshake
    /// combined.
    pub connect_timeout: Option<Duration>,

    /// Longest silence tolerated while a response is outstanding. Every byte
    /// received restarts the window.
    pub inactivity_timeout: Option<Duration>,

    /// Proxy to route requests through.
    pub proxy: Option<Proxy>,

    /// TCP socket options.
    pub tcp: TcpConfig,

    /// TLS client configuration. The platform's roots are trusted when unset.
    #[cfg(feature = "tls")]
    pub tls: Option<std::sync::Arc<rustls::ClientConfig>>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(5)),
            inactivity_timeout: Some(Duration::from_secs(10)),
            proxy: None,
            tcp: TcpConfig::default(),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

impl ConnectionOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.connect_timeout = timeout.into();
        self
    }

    /// Set the inactivity timeout.
    pub fn with_inactivity_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.inactivity_timeout = timeout.into();
        self
    }

    /// Route requests through a proxy.
    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set TCP socket options.
    pub fn with_tcp(mut self, tcp: TcpConfig) -> Self {
        self.tcp = tcp;
        self
    }

    /// Use a custom TLS configuration.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, config: impl Into<std::sync::Arc<rustls::ClientConfig>>) -> Self {
        self.tls = Some(config.into());
        self
    }
}

/// An HTTP proxy.
///
/// Plain `http` requests are sent to the proxy with absolute-form targets.
/// `https` requests open a `CONNECT` tunnel through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) authorization: Option<(String, String)>,
}

impl Proxy {
    /// A proxy listening on `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            authorization: None,
        }
    }

    /// Authenticate to the proxy with Basic credentials.
    pub fn with_authorization(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.authorization = Some((user.into(), password.into()));
        self
    }

    /// Proxy host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Per-request configuration.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub(crate) path: Option<String>,
    pub(crate) query: Option<Query>,
    pub(crate) headers: Headers,
    pub(crate) body: Body,
    pub(crate) redirects: u32,
    pub(crate) keepalive: bool,
    pub(crate) pass_cookies: bool,
    pub(crate) decoding: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            path: None,
            query: None,
            headers: Headers::new(),
            body: Body::Empty,
            redirects: 0,
            keepalive: false,
            pass_cookies: true,
            decoding: true,
        }
    }
}

impl RequestOptions {
    /// Default options: no redirects, no keepalive, cookies passed and
    /// content decoded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request this path instead of the connection URL's.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Query placed in front of the connection URL's own query.
    pub fn query(mut self, query: impl Into<Query>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set a request header.
    ///
    /// Use [`HeaderValue::Omit`] to suppress a header sent by default, such
    /// as `User-Agent`.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set several request headers.
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<HeaderValue>,
    {
        for (name, value) in headers {
            self.headers.insert(name, value);
        }
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Send a form body, `application/x-www-form-urlencoded` unless a
    /// `Content-Type` header is set.
    pub fn form(mut self, form: FormValue) -> Self {
        self.body = Body::Form(form);
        self
    }

    /// Stream a file as the request body.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body = Body::File(path.into());
        self
    }

    /// Follow at most `redirects` redirects.
    pub fn redirects(mut self, redirects: u32) -> Self {
        self.redirects = redirects;
        self
    }

    /// Keep the socket open after the response and allow pipelining.
    ///
    /// If the server closes the socket while later requests are pipelined
    /// behind this one, idempotent requests are sent again on a new socket.
    /// Others (such as `POST`) fail with
    /// [`Error::ConnectionClosed`](crate::Error::ConnectionClosed), since the
    /// server may already have acted on them.
    pub fn keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Send cookies from the context's jar.
    pub fn pass_cookies(mut self, pass_cookies: bool) -> Self {
        self.pass_cookies = pass_cookies;
        self
    }

    /// Decode `gzip` and `deflate` bodies.
    pub fn decoding(mut self, decoding: bool) -> Self {
        self.decoding = decoding;
        self
    }

    /// Headers set on this request.
    pub fn get_headers(&self) -> &Headers {
        &self.headers
    }
}
