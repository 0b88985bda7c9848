//! TCP connection setup.
//!
//! Sockets are built with `socket2` so options can be applied before the
//! connect, then handed to tokio. Resolved addresses are tried in order until
//! one accepts.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tracing::{trace, warn, Instrument};

use super::dns::SocketAddrs;

/// Socket options applied to every connection before it is established.
///
/// Options the platform rejects are logged and skipped; they never fail a
/// connection.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Idle time before keepalive probes start. `None` leaves `SO_KEEPALIVE`
    /// off.
    pub keep_alive_timeout: Option<Duration>,

    /// Source address for connections to IPv4 servers.
    pub local_address_ipv4: Option<Ipv4Addr>,

    /// Source address for connections to IPv6 servers.
    pub local_address_ipv6: Option<Ipv6Addr>,

    /// Set `TCP_NODELAY`.
    pub nodelay: bool,

    /// Set `SO_REUSEADDR`.
    pub reuse_address: bool,

    /// `SO_SNDBUF`, when set.
    pub send_buffer_size: Option<usize>,

    /// `SO_RCVBUF`, when set.
    pub recv_buffer_size: Option<usize>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout: Some(Duration::from_secs(90)),
            local_address_ipv4: None,
            local_address_ipv6: None,
            nodelay: true,
            reuse_address: true,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

impl TcpConfig {
    /// The configured source address matching the family of `remote`.
    fn local_address(&self, remote: &SocketAddr) -> Option<SocketAddr> {
        match remote {
            SocketAddr::V4(_) => self.local_address_ipv4.map(|ip| SocketAddr::new(ip.into(), 0)),
            SocketAddr::V6(_) => self.local_address_ipv6.map(|ip| SocketAddr::new(ip.into(), 0)),
        }
    }
}

/// Connect to the first address in `addrs` that accepts.
///
/// The error from the last attempt is returned when every address fails.
pub(crate) async fn connect_any(addrs: SocketAddrs, config: &TcpConfig) -> io::Result<TcpStream> {
    let mut last_error = None;
    for address in addrs {
        let span = tracing::trace_span!("connect", %address);
        match connect(address, config).instrument(span).await {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                trace!(%address, %error, "connection attempt failed");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses to connect to")
    }))
}

async fn connect(address: SocketAddr, config: &TcpConfig) -> io::Result<TcpStream> {
    let socket = {
        let _options = tracing::trace_span!("socket_options").entered();
        open_socket(&address, config)?
    };

    let stream = socket.connect(address).await?;
    trace!(local = ?stream.local_addr().ok(), "tcp connected");
    Ok(stream)
}

/// A non-blocking socket for `address` with `config` applied.
fn open_socket(address: &SocketAddr, config: &TcpConfig) -> io::Result<TcpSocket> {
    use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

    let socket = Socket::new(Domain::for_address(*address), Type::STREAM, Some(Protocol::TCP))?;

    // Tokio only adopts non-blocking sockets.
    socket.set_nonblocking(true)?;

    if let Some(idle) = config.keep_alive_timeout {
        if let Err(error) = socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle)) {
            warn!(%error, "unable to enable tcp keepalive");
        }
    }

    if config.nodelay {
        if let Err(error) = socket.set_nodelay(true) {
            warn!(%error, "unable to set TCP_NODELAY");
        }
    }

    if config.reuse_address {
        if let Err(error) = socket.set_reuse_address(true) {
            warn!(%error, "unable to set SO_REUSEADDR");
        }
    }

    if let Some(size) = config.send_buffer_size {
        if let Err(error) = socket.set_send_buffer_size(size) {
            warn!(%error, size, "unable to size the send buffer");
        }
    }

    if let Some(size) = config.recv_buffer_size {
        if let Err(error) = socket.set_recv_buffer_size(size) {
            warn!(%error, size, "unable to size the receive buffer");
        }
    }

    if let Some(local) = config.local_address(address) {
        socket.bind(&local.into())?;
        trace!(%local, "bound local address");
    }

    Ok(TcpSocket::from_std_stream(std::net::TcpStream::from(socket)))
}
