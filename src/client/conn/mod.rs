//! Client connections.
//!
//! A [`ConnectionManager`] owns at most one connection per [`Endpoint`]:
//! the server's host and port, whether TLS is used, and the proxy in front
//! of it. Each connection is a task that owns its socket (see
//! [`connection`]), so requests to the same endpoint are queued on one
//! socket and either pipelined or sent one after the other.
//!
//! Opening a socket goes through the same steps for every endpoint:
//!
//! - resolution through the context's [`Resolver`](dns::Resolver),
//! - a TCP connection configured by [`TcpConfig`](tcp::TcpConfig),
//! - a `CONNECT` tunnel when an `https` endpoint sits behind a proxy,
//! - a TLS handshake for `https` endpoints.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::client::{ConnectionOptions, Error, Proxy};
use crate::uri;

pub(crate) mod connection;
pub mod dns;
mod proxy;
mod stream;
pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;

pub(crate) use self::connection::{Connection, Dispatch, Event};
pub use self::connection::ConnectionState;
pub use self::dns::{GaiResolver, Resolver, SocketAddrs};
pub use self::tcp::TcpConfig;
#[cfg(feature = "tls")]
pub use self::tls::default_tls_config;

/// Identifies the socket a request travels on.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) tls: bool,
    pub(crate) proxy: Option<(String, u16)>,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        if self.host.contains(':') {
            write!(f, "{scheme}://[{}]:{}", self.host, self.port)?;
        } else {
            write!(f, "{scheme}://{}:{}", self.host, self.port)?;
        }
        if let Some((host, port)) = &self.proxy {
            write!(f, " via {host}:{port}")?;
        }
        Ok(())
    }
}

impl Endpoint {
    pub(crate) fn new(
        host: impl Into<String>,
        port: u16,
        tls: bool,
        proxy: Option<(String, u16)>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
            proxy,
        }
    }

    /// The endpoint a request to `url` is sent through.
    pub(crate) fn for_url(url: &Url, proxy: Option<&Proxy>) -> Result<Self, Error> {
        let host = uri::resolvable_host(url).ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            scheme => return Err(Error::UnsupportedScheme(scheme.to_owned())),
        };

        Ok(Self::new(
            host,
            port,
            tls,
            proxy.map(|proxy| (proxy.host.clone(), proxy.port)),
        ))
    }

    /// Plain HTTP through a proxy: requests use absolute-form targets.
    pub(crate) fn is_forward_proxy(&self) -> bool {
        self.proxy.is_some() && !self.tls
    }

    /// TLS through a proxy: a `CONNECT` tunnel is opened first.
    pub(crate) fn tunneled(&self) -> bool {
        self.proxy.is_some() && self.tls
    }

    /// The host and port the TCP connection is made to.
    pub(crate) fn connect_target(&self) -> (&str, u16) {
        match &self.proxy {
            Some((host, port)) => (host.as_str(), *port),
            None => (self.host.as_str(), self.port),
        }
    }
}

/// Owns the connections made on behalf of one
/// [`HttpConnection`](crate::HttpConnection).
#[derive(Debug, Default)]
pub(crate) struct ConnectionManager {
    connections: Mutex<HashMap<Endpoint, Connection>>,
    last: Mutex<Option<Connection>>,
}

impl ConnectionManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The open connection for `endpoint`, or a new one.
    ///
    /// A connection whose task has exited (closed by the caller, or after the
    /// server closed a keepalive socket) is replaced.
    pub(crate) fn acquire(
        &self,
        endpoint: &Endpoint,
        options: &Arc<ConnectionOptions>,
        resolver: &Resolver,
    ) -> Connection {
        let mut connections = self.connections.lock();
        let connection = match connections.get(endpoint) {
            Some(connection) if !connection.is_closed() => {
                tracing::trace!(%endpoint, "reusing connection");
                connection.clone()
            }
            _ => {
                tracing::trace!(%endpoint, "new connection");
                let connection =
                    Connection::spawn(endpoint.clone(), options.clone(), resolver.clone());
                connections.insert(endpoint.clone(), connection.clone());
                connection
            }
        };

        *self.last.lock() = Some(connection.clone());
        connection
    }

    /// Close every connection, failing their outstanding requests with
    /// [`Error::Closed`].
    pub(crate) fn close(&self, reason: &str) {
        for (_, connection) in self.connections.lock().drain() {
            connection.close(reason);
        }
    }

    /// Remote address of the most recently used connection.
    pub(crate) fn peer(&self) -> Option<SocketAddr> {
        self.last.lock().as_ref().and_then(Connection::peer)
    }
}
