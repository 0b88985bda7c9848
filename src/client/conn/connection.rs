//! A single HTTP/1.x connection, driven by its own task.
//!
//! Requests are handed to the task as [`Dispatch`]es and answered through
//! per-request event channels. The task owns the socket, writes requests in
//! submission order and decodes responses in the same order. Keepalive
//! requests are pipelined: the next one is written as soon as every request
//! already on the wire is keepalive as well.
//!
//! After a response completes the task waits for the request's owner to
//! acknowledge it before decoding the next one. This keeps completion
//! callbacks in send order, and lets a redirect queue its next hop on this
//! connection before later requests are considered.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tower::ServiceExt as _;
use tracing::Instrument as _;

use super::dns::Resolver;
use super::stream::Stream;
use super::{proxy, tcp, Endpoint};
use crate::client::{ConnectionOptions, Error};
use crate::codec::request::{BodySource, EncodedRequest};
use crate::codec::{Decoded, ResponseDecoder, ResponseHeader};

/// A request waiting to be written to a connection.
#[derive(Debug)]
pub(crate) struct Dispatch {
    pub(crate) request: EncodedRequest,
    pub(crate) head_request: bool,
    /// Whether the request may be sent again after the server dropped it.
    pub(crate) idempotent: bool,
    pub(crate) keepalive: bool,
    pub(crate) decoding: bool,
    pub(crate) events: mpsc::UnboundedSender<Event>,
}

impl Dispatch {
    fn fail(self, error: Error) {
        let _ = self.events.send(Event::Failed(error));
    }
}

/// Progress of one request, reported to its owner.
#[derive(Debug)]
pub(crate) enum Event {
    /// The response head arrived.
    Head(ResponseHeader),

    /// A chunk of (content-decoded) body.
    Data(Bytes),

    /// The response is complete. The connection resumes once the sender is
    /// used or dropped.
    Complete(oneshot::Sender<()>),

    /// The request failed; no further events follow.
    Failed(Error),
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket is open.
    Idle,

    /// Looking up the server address.
    Resolving,

    /// Establishing TCP, a proxy tunnel or TLS.
    Connecting,

    /// A socket is open.
    Connected,

    /// The connection task has exited; no further requests are accepted.
    Closed,
}

#[derive(Debug)]
enum Command {
    Send(Dispatch),
    Close(String),
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ConnectionState>,
    peer: Mutex<Option<SocketAddr>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

/// Handle to a connection task.
#[derive(Clone)]
pub(crate) struct Connection {
    endpoint: Arc<Endpoint>,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Start a connection task for `endpoint`. No socket is opened until the
    /// first request arrives.
    pub(crate) fn spawn(
        endpoint: Endpoint,
        options: Arc<ConnectionOptions>,
        resolver: Resolver,
    ) -> Connection {
        let endpoint = Arc::new(endpoint);
        let (commands, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Idle),
            peer: Mutex::new(None),
        });

        let task = ConnectionTask {
            endpoint: endpoint.clone(),
            options,
            resolver,
            commands: receiver,
            accepting: true,
            shared: shared.clone(),
            pending: VecDeque::new(),
            in_flight: VecDeque::new(),
            stream: None,
            buffer: BytesMut::new(),
            served: 0,
            peer_closed: false,
            deadline: None,
        };

        let span = tracing::debug_span!("connection", endpoint = %endpoint);
        tokio::spawn(task.run().instrument(span));

        Connection {
            endpoint,
            commands,
            shared,
        }
    }

    /// Queue a request. If the task has exited, the request fails with
    /// [`Error::ConnectionClosed`].
    pub(crate) fn send(&self, dispatch: Dispatch) {
        if let Err(mpsc::error::SendError(Command::Send(dispatch))) =
            self.commands.send(Command::Send(dispatch))
        {
            dispatch.fail(Error::ConnectionClosed);
        }
    }

    /// Close the connection, failing every outstanding request with
    /// [`Error::Closed`].
    pub(crate) fn close(&self, reason: impl Into<String>) {
        let _ = self.commands.send(Command::Close(reason.into()));
    }

    /// Whether the task has exited.
    pub(crate) fn is_closed(&self) -> bool {
        self.commands.is_closed() || self.state() == ConnectionState::Closed
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Remote address, once a socket has been connected.
    pub(crate) fn peer(&self) -> Option<SocketAddr> {
        *self.shared.peer.lock()
    }

    #[cfg(test)]
    pub(crate) fn same_task(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

#[derive(Debug)]
struct InFlight {
    dispatch: Dispatch,
    decoder: ResponseDecoder,
}

struct ConnectionTask {
    endpoint: Arc<Endpoint>,
    options: Arc<ConnectionOptions>,
    resolver: Resolver,
    commands: mpsc::UnboundedReceiver<Command>,
    accepting: bool,
    shared: Arc<Shared>,

    pending: VecDeque<Dispatch>,
    in_flight: VecDeque<InFlight>,

    stream: Option<Stream>,
    buffer: BytesMut,

    /// Responses completed on the current socket.
    served: usize,
    peer_closed: bool,
    deadline: Option<Instant>,
}

impl ConnectionTask {
    async fn run(mut self) {
        tracing::trace!("connection task started");
        let result = self.serve().await;
        self.shared.set_state(ConnectionState::Closed);
        self.stream = None;

        match result {
            Ok(()) => tracing::trace!("connection task finished"),
            Err(error) => {
                tracing::debug!(%error, "connection failed");
                for flight in self.in_flight.drain(..) {
                    flight.dispatch.fail(error.clone());
                }
                for dispatch in self.pending.drain(..) {
                    dispatch.fail(error.clone());
                }
            }
        }

        // Anything that raced in after the failure.
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Send(dispatch) = command {
                dispatch.fail(Error::ConnectionClosed);
            }
        }
    }

    async fn serve(&mut self) -> Result<(), Error> {
        loop {
            self.write_pending().await?;

            if !self.accepting && self.pending.is_empty() && self.in_flight.is_empty() {
                return Ok(());
            }

            let deadline = self.deadline;
            tokio::select! {
                command = self.commands.recv(), if self.accepting => match command {
                    Some(Command::Send(dispatch)) => self.pending.push_back(dispatch),
                    Some(Command::Close(reason)) => {
                        tracing::debug!(%reason, "connection closed by caller");
                        return Err(Error::Closed(reason));
                    }
                    None => self.accepting = false,
                },
                read = read_some(&mut self.stream, &mut self.buffer), if self.stream.is_some() => {
                    match read {
                        Ok(0) => self.on_eof().await?,
                        Ok(n) => {
                            tracing::trace!(bytes = n, "read");
                            self.on_data().await?;
                        }
                        Err(error) => return Err(Error::transport(error)),
                    }
                }
                _ = expire(deadline), if deadline.is_some() => {
                    tracing::debug!("no bytes received within the inactivity window");
                    return Err(Error::InactivityTimeout);
                }
            }
        }
    }

    /// Write every pending request the connection may currently carry.
    async fn write_pending(&mut self) -> Result<(), Error> {
        while let Some(next) = self.pending.front() {
            if self.peer_closed {
                return Err(Error::ConnectionClosed);
            }

            let pipelined = next.keepalive && self.in_flight.iter().all(|f| f.dispatch.keepalive);
            if !self.in_flight.is_empty() && !pipelined {
                return Ok(());
            }

            if self.stream.is_none() {
                self.connect().await?;
            }

            let Some(dispatch) = self.pending.pop_front() else {
                return Ok(());
            };
            let Some(stream) = self.stream.as_mut() else {
                return Ok(());
            };

            if let Err(error) = write_request(stream, &dispatch.request).await {
                let reused = self.served > 0 || !self.in_flight.is_empty();
                self.pending.push_front(dispatch);
                return Err(if reused && is_peer_reset(&error) {
                    Error::ConnectionClosed
                } else {
                    Error::transport(error)
                });
            }
            tracing::trace!(pipelined = !self.in_flight.is_empty(), "request written");

            let decoder = ResponseDecoder::new(dispatch.head_request, dispatch.decoding);
            self.in_flight.push_back(InFlight { dispatch, decoder });
            self.touch();
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<(), Error> {
        let connecting = establish(
            self.endpoint.clone(),
            self.options.clone(),
            self.resolver.clone(),
            self.shared.clone(),
        );
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    let stream = result?;
                    *self.shared.peer.lock() = stream.peer_addr().ok();
                    self.shared.set_state(ConnectionState::Connected);
                    self.stream = Some(stream);
                    self.buffer.clear();
                    self.served = 0;
                    return Ok(());
                }
                command = self.commands.recv(), if self.accepting => match command {
                    Some(Command::Send(dispatch)) => self.pending.push_back(dispatch),
                    Some(Command::Close(reason)) => return Err(Error::Closed(reason)),
                    None => self.accepting = false,
                },
            }
        }
    }

    async fn on_data(&mut self) -> Result<(), Error> {
        self.touch();
        self.drive(false).await
    }

    async fn on_eof(&mut self) -> Result<(), Error> {
        tracing::trace!("peer closed the connection");
        if self.in_flight.is_empty() {
            self.stream = None;
            self.peer_closed = true;
            self.shared.set_state(ConnectionState::Idle);
            return Ok(());
        }

        self.drive(true).await?;
        if self.stream.take().is_some() {
            self.peer_closed = true;
        }
        Ok(())
    }

    /// Feed buffered bytes to in-flight decoders, front first.
    async fn drive(&mut self, eof: bool) -> Result<(), Error> {
        loop {
            let Some(front) = self.in_flight.front_mut() else {
                if !self.buffer.is_empty() {
                    tracing::warn!(bytes = self.buffer.len(), "discarding unexpected data");
                    self.buffer.clear();
                }
                return Ok(());
            };

            let decoded = if eof {
                front.decoder.decode_eof(&mut self.buffer)
            } else {
                front.decoder.decode(&mut self.buffer)
            };

            match decoded? {
                Some(Decoded::Head(head)) => {
                    let _ = front.dispatch.events.send(Event::Head(head));
                }
                Some(Decoded::Data(data)) => {
                    let _ = front.dispatch.events.send(Event::Data(data));
                }
                Some(Decoded::Complete) => {
                    if !self.complete_front().await {
                        return Ok(());
                    }
                }
                None => return Ok(()),
            }
        }
    }

    /// Hand the completed front response to its owner. Returns whether the
    /// socket is still usable.
    async fn complete_front(&mut self) -> bool {
        let Some(done) = self.in_flight.pop_front() else {
            return true;
        };
        self.served += 1;
        let reusable = done.decoder.keep_alive() && done.dispatch.keepalive;

        let (ack, acked) = oneshot::channel();
        if done.dispatch.events.send(Event::Complete(ack)).is_ok() {
            let _ = acked.await;
        }

        if self.in_flight.is_empty() {
            self.deadline = None;
        }

        if !reusable {
            self.reset();
        }
        reusable
    }

    /// Drop the socket. Idempotent requests that were pipelined behind the
    /// last response are sent again on the next socket; the server may have
    /// read the others, so they fail with [`Error::ConnectionClosed`].
    fn reset(&mut self) {
        tracing::trace!(served = self.served, "releasing socket");
        self.stream = None;
        self.buffer.clear();
        self.deadline = None;
        self.shared.set_state(ConnectionState::Idle);

        while let Some(flight) = self.in_flight.pop_back() {
            if flight.dispatch.idempotent {
                self.pending.push_front(flight.dispatch);
            } else {
                tracing::debug!("not replaying a non-idempotent request");
                flight.dispatch.fail(Error::ConnectionClosed);
            }
        }
    }

    fn touch(&mut self) {
        self.deadline = self
            .options
            .inactivity_timeout
            .filter(|_| !self.in_flight.is_empty())
            .map(|timeout| Instant::now() + timeout);
    }
}

/// Resolve, connect, tunnel and handshake, bounded by the connect timeout.
async fn establish(
    endpoint: Arc<Endpoint>,
    options: Arc<ConnectionOptions>,
    resolver: Resolver,
    shared: Arc<Shared>,
) -> Result<Stream, Error> {
    let connecting = async {
        let (host, port) = endpoint.connect_target();

        shared.set_state(ConnectionState::Resolving);
        let mut addrs = resolver
            .oneshot(host.into())
            .await
            .map_err(Error::dns(host))?;
        if addrs.is_empty() {
            return Err(Error::dns(host)(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses returned",
            )));
        }
        addrs.set_port(port);

        shared.set_state(ConnectionState::Connecting);
        let mut tcp = tcp::connect_any(addrs, &options.tcp)
            .await
            .map_err(Error::connect)?;

        if endpoint.tunneled() {
            let authorization = options.proxy.as_ref().and_then(|p| p.authorization.as_ref());
            proxy::tunnel(&mut tcp, &endpoint.host, endpoint.port, authorization).await?;
        }

        secure(&endpoint, &options, tcp).await
    };

    match options.connect_timeout {
        Some(timeout) => tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| Error::ConnectTimeout)?,
        None => connecting.await,
    }
}

#[cfg(feature = "tls")]
async fn secure(
    endpoint: &Endpoint,
    options: &ConnectionOptions,
    tcp: tokio::net::TcpStream,
) -> Result<Stream, Error> {
    if !endpoint.tls {
        return Ok(Stream::from(tcp));
    }

    let config = options
        .tls
        .clone()
        .unwrap_or_else(super::tls::default_tls_config);
    super::tls::handshake(tcp, &endpoint.host, config)
        .await
        .map_err(|error| Error::Tls(Arc::new(error)))
}

#[cfg(not(feature = "tls"))]
async fn secure(
    endpoint: &Endpoint,
    _options: &ConnectionOptions,
    tcp: tokio::net::TcpStream,
) -> Result<Stream, Error> {
    if endpoint.tls {
        return Err(Error::UnsupportedScheme("https".into()));
    }
    Ok(Stream::from(tcp))
}

async fn write_request(stream: &mut Stream, request: &EncodedRequest) -> io::Result<()> {
    stream.write_all(&request.head).await?;
    match &request.body {
        BodySource::Empty => {}
        BodySource::Bytes(bytes) => stream.write_all(bytes).await?,
        BodySource::File { path, len } => {
            let file = tokio::fs::File::open(path).await?;
            let copied = tokio::io::copy(&mut file.take(*len), stream).await?;
            if copied != *len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "request body file shrank while sending",
                ));
            }
        }
    }
    stream.flush().await
}

async fn read_some(stream: &mut Option<Stream>, buffer: &mut BytesMut) -> io::Result<usize> {
    match stream {
        Some(stream) => {
            buffer.reserve(8 * 1024);
            stream.read_buf(buffer).await
        }
        None => std::future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn is_peer_reset(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}
