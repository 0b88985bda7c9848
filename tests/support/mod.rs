//! A small HTTP/1.1 stub server for client tests.
//!
//! The server parses each request on a connection in turn (so pipelined
//! requests are answered in order), hands it to a handler and writes the
//! handler's raw reply bytes back.

#![allow(dead_code)]

use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A request as received by the stub server.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub head: String,
    pub body: Vec<u8>,
}

impl Request {
    /// Last value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    pub fn query(&self) -> &str {
        self.target.split_once('?').map(|(_, q)| q).unwrap_or_default()
    }

    /// The request exactly as received.
    pub fn raw(&self) -> Vec<u8> {
        let mut raw = self.head.clone().into_bytes();
        raw.extend_from_slice(&self.body);
        raw
    }
}

/// What the stub server sends back.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub bytes: Vec<u8>,
    pub close: bool,
    pub delay: Option<Duration>,
}

impl Reply {
    /// Bytes sent verbatim.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            ..Default::default()
        }
    }

    /// A response with a `Content-Length`.
    pub fn new(
        status: u16,
        reason: &str,
        headers: &[(&str, &str)],
        body: impl AsRef<[u8]>,
    ) -> Self {
        let body = body.as_ref();
        let mut bytes = Vec::new();
        write!(bytes, "HTTP/1.1 {status} {reason}\r\n").unwrap();
        for (name, value) in headers {
            write!(bytes, "{name}: {value}\r\n").unwrap();
        }
        write!(bytes, "Content-Length: {}\r\n\r\n", body.len()).unwrap();
        bytes.extend_from_slice(body);
        Self::raw(bytes)
    }

    /// `200 OK` with a body.
    pub fn ok(body: impl AsRef<[u8]>) -> Self {
        Self::new(200, "OK", &[("Content-Type", "text/plain")], body)
    }

    /// A redirect to `location`.
    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status, "Moved", &[("Location", location)], "")
    }

    /// Close the connection after writing.
    pub fn close(mut self) -> Self {
        self.close = true;
        self
    }

    /// Wait before writing.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Handler = Arc<dyn Fn(&Request) -> Reply + Send + Sync>;

/// A running stub server. Stops when dropped.
pub struct Server {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Request>>>,
    connections: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl Server {
    /// Serve on an ephemeral port of 127.0.0.1.
    pub async fn start<F>(handler: F) -> Server
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        Self::bind("127.0.0.1:0".parse().unwrap(), handler).await
    }

    /// Serve on `addr`.
    pub async fn bind<F>(addr: SocketAddr, handler: F) -> Server
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: Handler = Arc::new(handler);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));

        let task = tokio::spawn({
            let requests = requests.clone();
            let connections = connections.clone();
            async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    *connections.lock() += 1;
                    tokio::spawn(serve_connection(socket, handler.clone(), requests.clone()));
                }
            }
        });

        Server {
            addr,
            requests,
            connections,
            task,
        }
    }

    /// Always answer with the same bytes and close the connection.
    pub async fn stub(response: impl Into<Vec<u8>>) -> Server {
        let response = response.into();
        Self::start(move |_| Reply::raw(response.clone()).close()).await
    }

    /// Answer every request with the request itself as the body.
    pub async fn echo() -> Server {
        Self::start(|request| Reply::ok(request.raw())).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `http://127.0.0.1:<port><path>`.
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.addr.port(), path)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        *self.connections.lock()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    handler: Handler,
    requests: Arc<Mutex<Vec<Request>>>,
) {
    let mut buffer = Vec::new();
    loop {
        let request = match read_request(&mut socket, &mut buffer).await {
            Some(request) => request,
            None => return,
        };
        requests.lock().push(request.clone());

        let reply = handler(&request);
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        if socket.write_all(&reply.bytes).await.is_err() {
            return;
        }
        if reply.close {
            let _ = socket.shutdown().await;
            linger(&mut socket).await;
            return;
        }
    }
}

/// Read until the client hangs up, so unread pipelined requests do not turn
/// the close into a reset that discards the reply.
async fn linger(socket: &mut TcpStream) {
    let drain = async {
        let mut sink = [0u8; 4096];
        while let Ok(n) = socket.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_millis(500), drain).await;
}

async fn read_request(socket: &mut TcpStream, buffer: &mut Vec<u8>) -> Option<Request> {
    let head_end = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.splitn(3, ' ');
    let method = request_line.next()?.to_owned();
    let target = request_line.next()?.to_owned();

    let headers: Vec<(String, String)> = lines
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
        .collect();

    let length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < head_end + length {
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    let body = buffer[head_end..head_end + length].to_vec();
    buffer.drain(..head_end + length);

    Some(Request {
        method,
        target,
        headers,
        head,
        body,
    })
}

/// A server imitating a typical test application.
///
/// Routes:
/// - `/` answers `Hello, World!` (and echoes a `POST` body when present)
/// - `/echo_query` answers the query string
/// - `/echo_content_length` answers the received `Content-Length`
/// - `/echo_content_type` answers the received `Content-Type`
/// - `/echo-user-agent` answers the `User-Agent` quoted, or `nil`
/// - `/authtest` answers 200 for `user:pass` Basic credentials, 401 otherwise
/// - `/gzip`, `/deflate` answer `compressed`, encoded
/// - `/set_cookie` sets one cookie, `/set_multiple_cookies` two
/// - `/relative-location` redirects to `/forwarded`
/// - `/timeout` answers after a second
/// - anything else is a 404
pub async fn app() -> Server {
    Server::start(route).await
}

pub fn route(request: &Request) -> Reply {
    match request.path() {
        "/" => match request.method.as_str() {
            "POST" | "PUT" | "PATCH" if !request.body.is_empty() => Reply::ok(&request.body),
            "HEAD" => Reply::new(200, "OK", &[], "Hello, World!"),
            _ => Reply::ok("Hello, World!"),
        },
        "/echo_query" => Reply::ok(request.query()),
        "/echo_content_length" => Reply::ok(request.header("content-length").unwrap_or("none")),
        "/echo_content_type" => Reply::ok(request.header("content-type").unwrap_or("none")),
        "/echo-user-agent" => Reply::ok(match request.header("user-agent") {
            Some(agent) => format!("{agent:?}"),
            None => "nil".to_owned(),
        }),
        "/echo_cookie" => Reply::ok(request.header("cookie").unwrap_or("none")),
        "/authtest" => {
            if request.header("authorization") == Some("Basic dXNlcjpwYXNz") {
                Reply::ok("success")
            } else {
                Reply::new(401, "Unauthorized", &[], "unauthorized")
            }
        }
        "/gzip" => Reply::new(200, "OK", &[("Content-Encoding", "gzip")], gzip(b"compressed")),
        "/deflate" => {
            Reply::new(200, "OK", &[("Content-Encoding", "deflate")], deflate(b"compressed"))
        }
        "/set_cookie" => Reply::new(
            200,
            "OK",
            &[("Set-Cookie", "id=1; expires=Sat, 09 Aug 2031 17:53:39 GMT; path=/;")],
            "cookie set",
        ),
        "/set_multiple_cookies" => Reply::new(
            200,
            "OK",
            &[
                ("Set-Cookie", "id=1; expires=Sat, 09 Aug 2031 17:53:39 GMT; path=/;"),
                ("Set-Cookie", "id=2;"),
            ],
            "cookies set",
        ),
        "/relative-location" => Reply::redirect(301, "/forwarded"),
        "/forwarded" => Reply::ok("Forwarded"),
        "/etag" => Reply::new(
            200,
            "OK",
            &[("ETag", "abcdefg"), ("Last-Modified", "Fri, 13 Aug 2010 17:31:21 GMT")],
            "",
        ),
        "/status/420" => Reply::raw("HTTP/1.1 420\r\nContent-Length: 0\r\n\r\n"),
        "/timeout" => Reply::ok("slow").delay(Duration::from_secs(1)),
        _ => Reply::new(404, "Not Found", &[], "not found"),
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
