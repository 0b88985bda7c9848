//! Host name resolution.
//!
//! Resolution goes through a boxed `tower::Service`, so tests and embedders
//! can substitute their own lookup.

use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::{fmt, io};

use futures_util::Future;
use pin_project::{pin_project, pinned_drop};
use tokio::task::JoinHandle;
use tower::util::BoxCloneService;

/// A type-erased resolver from host name to socket addresses.
///
/// Any `tower::Service<Box<str>>` returning [`SocketAddrs`] can be used; see
/// [`Builder::with_resolver`](crate::context::Builder::with_resolver).
pub type Resolver = BoxCloneService<Box<str>, SocketAddrs, io::Error>;

/// Addresses returned by a resolver, in preference order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketAddrs(Vec<SocketAddr>);

impl SocketAddrs {
    /// Overwrite the port of every address.
    pub fn set_port(&mut self, port: u16) {
        for addr in &mut self.0 {
            addr.set_port(port);
        }
    }

    /// Whether no address was found.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of addresses.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the addresses.
    pub fn iter(&self) -> impl Iterator<Item = &SocketAddr> {
        self.0.iter()
    }
}

impl FromIterator<SocketAddr> for SocketAddrs {
    fn from_iter<T: IntoIterator<Item = SocketAddr>>(iter: T) -> Self {
        SocketAddrs(iter.into_iter().collect())
    }
}

impl IntoIterator for SocketAddrs {
    type Item = SocketAddr;
    type IntoIter = std::vec::IntoIter<SocketAddr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Resolves host names with the system's `getaddrinfo`.
///
/// Lookups block, so each one runs on tokio's blocking pool. Returned
/// addresses carry port zero; the caller sets the port.
#[derive(Debug, Default, Clone, Copy)]
pub struct GaiResolver;

impl GaiResolver {
    /// The system resolver.
    pub fn new() -> Self {
        GaiResolver
    }
}

impl tower::Service<Box<str>> for GaiResolver {
    type Response = SocketAddrs;
    type Error = io::Error;
    type Future = GaiFuture;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, host: Box<str>) -> Self::Future {
        let parent = tracing::Span::current();
        let lookup = tokio::task::spawn_blocking(move || -> io::Result<SocketAddrs> {
            let _span = tracing::trace_span!(parent: &parent, "getaddrinfo", %host).entered();
            let addrs = (&*host, 0).to_socket_addrs()?.collect::<SocketAddrs>();
            tracing::trace!(count = addrs.len(), "resolved");
            Ok(addrs)
        });
        GaiFuture { lookup }
    }
}

/// A pending [`GaiResolver`] lookup. Dropping it abandons the lookup.
#[pin_project(PinnedDrop)]
pub struct GaiFuture {
    #[pin]
    lookup: JoinHandle<io::Result<SocketAddrs>>,
}

impl fmt::Debug for GaiFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaiFuture").finish_non_exhaustive()
    }
}

impl Future for GaiFuture {
    type Output = io::Result<SocketAddrs>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let joined = ready!(self.project().lookup.poll(cx));
        Poll::Ready(joined.unwrap_or_else(|error| {
            let kind = if error.is_cancelled() {
                io::ErrorKind::Interrupted
            } else {
                io::ErrorKind::Other
            };
            Err(io::Error::new(kind, error))
        }))
    }
}

#[pinned_drop]
impl PinnedDrop for GaiFuture {
    fn drop(self: Pin<&mut Self>) {
        self.project().lookup.abort();
    }
}
