//! `CONNECT` tunnels through an HTTP proxy.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::client::Error;
use crate::codec::request::basic_auth;
use crate::codec::{Decoded, ResponseDecoder};

/// Ask the proxy on `stream` to open a tunnel to `host:port`.
///
/// Any `2xx` answer opens the tunnel; the stream then carries bytes for the
/// origin server.
pub(crate) async fn tunnel(
    stream: &mut TcpStream,
    host: &str,
    port: u16,
    authorization: Option<&(String, String)>,
) -> Result<(), Error> {
    let authority = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };

    let mut request = BytesMut::with_capacity(128);
    request.put_slice(format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n").as_bytes());
    if let Some((user, password)) = authorization {
        let credentials = basic_auth(user, password);
        request.put_slice(format!("Proxy-Authorization: {credentials}\r\n").as_bytes());
    }
    request.put_slice(b"\r\n");

    tracing::trace!(%authority, "requesting proxy tunnel");
    stream.write_all(&request).await.map_err(Error::transport)?;

    let mut decoder = ResponseDecoder::new(true, false);
    let mut buffer = BytesMut::with_capacity(1024);
    loop {
        if let Some(Decoded::Head(head)) = decoder.decode(&mut buffer)? {
            if !(200..300).contains(&head.status()) {
                return Err(Error::Proxy(format!(
                    "tunnel to {authority} refused: {} {}",
                    head.status(),
                    head.reason()
                )));
            }
            if !buffer.is_empty() {
                tracing::warn!(bytes = buffer.len(), "discarding data sent after tunnel response");
            }
            tracing::trace!(%authority, "proxy tunnel established");
            return Ok(());
        }

        if stream.read_buf(&mut buffer).await.map_err(Error::transport)? == 0 {
            return Err(Error::Proxy(format!(
                "proxy closed the connection before opening a tunnel to {authority}"
            )));
        }
    }
}
