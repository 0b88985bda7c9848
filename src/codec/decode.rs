//! Incremental HTTP/1.x response decoder.
//!
//! The decoder is fed whatever bytes have arrived on the socket and emits
//! [`Decoded`] events one at a time: the parsed head, decoded body chunks and
//! finally a completion marker. Both CRLF and bare LF line endings are
//! accepted. Interim `1xx` heads (other than `101`) are skipped.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use http::Version;

use super::content::ContentDecoder;
use super::response::ResponseHeader;
use super::CodecError;

/// Upper bound on the size of a response head (status line and fields).
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Events produced while decoding a single response.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Status line and header fields have been parsed.
    Head(ResponseHeader),

    /// A chunk of body, already content-decoded when decoding is enabled.
    Data(Bytes),

    /// The response is complete.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(u64),
    Chunked,
    UntilClose,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StatusLine,
    Headers,
    Body,
    ChunkSize,
    ChunkData(u64),
    ChunkEnd,
    Trailers,
    Done,
}

/// Push decoder for one response on a connection.
#[derive(Debug)]
pub struct ResponseDecoder {
    state: State,
    framing: Framing,
    head: ResponseHeader,
    head_bytes: usize,
    content: ContentDecoder,
    decoding: bool,
    head_request: bool,
    received: bool,
    body_seen: bool,
    keep_alive: bool,
    ready: VecDeque<Decoded>,
}

impl ResponseDecoder {
    /// Create a decoder for the response to a request.
    ///
    /// Responses to `HEAD` requests never carry a body. When `decoding` is
    /// false, gzip and deflate bodies are passed through as received.
    pub fn new(head_request: bool, decoding: bool) -> Self {
        Self {
            state: State::StatusLine,
            framing: Framing::Empty,
            head: ResponseHeader::default(),
            head_bytes: 0,
            content: ContentDecoder::Identity,
            decoding,
            head_request,
            received: false,
            body_seen: false,
            keep_alive: false,
            ready: VecDeque::new(),
        }
    }

    /// Whether the full response has been decoded.
    pub fn is_complete(&self) -> bool {
        self.state == State::Done && self.ready.is_empty()
    }

    /// Whether any byte of this response has been seen.
    pub fn has_received(&self) -> bool {
        self.received
    }

    /// Whether the connection may carry another response after this one.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Decode the next event from `buf`, consuming the bytes it used.
    ///
    /// Returns `Ok(None)` when more input is needed (or the response is
    /// complete). Bytes after the end of this response are left in `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>, CodecError> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Ok(Some(event));
            }

            match self.state {
                State::StatusLine => {
                    while buf.first().is_some_and(|b| *b == b'\r' || *b == b'\n') {
                        buf.advance(1);
                    }
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    self.received = true;

                    let probe = &buf[..buf.len().min(5)];
                    if !b"HTTP/".starts_with(probe) {
                        return Err(CodecError::Malformed("invalid status line".into()));
                    }

                    let Some(line) = self.head_line(buf)? else {
                        return Ok(None);
                    };
                    self.head = parse_status_line(&line)?;
                    self.state = State::Headers;
                }
                State::Headers => {
                    let Some(line) = self.head_line(buf)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.finish_head()?;
                    } else {
                        self.parse_field(&line)?;
                    }
                }
                State::Body => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    match self.framing {
                        Framing::Length(remaining) => {
                            let take = remaining.min(buf.len() as u64);
                            let chunk = buf.split_to(take as usize).freeze();
                            self.body(&chunk)?;
                            self.framing = Framing::Length(remaining - take);
                            if remaining == take {
                                self.complete()?;
                            }
                        }
                        _ => {
                            let chunk = buf.split().freeze();
                            self.body(&chunk)?;
                        }
                    }
                }
                State::ChunkSize => {
                    let Some(line) = take_line(buf) else {
                        return Ok(None);
                    };
                    let size = line.split(';').next().unwrap_or_default().trim();
                    let size = u64::from_str_radix(size, 16).map_err(|_| {
                        CodecError::Malformed(format!("invalid chunk size: {size:?}"))
                    })?;
                    self.state = if size == 0 {
                        State::Trailers
                    } else {
                        State::ChunkData(size)
                    };
                }
                State::ChunkData(remaining) => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(buf.len() as u64);
                    let chunk = buf.split_to(take as usize).freeze();
                    self.body(&chunk)?;
                    self.state = if remaining == take {
                        State::ChunkEnd
                    } else {
                        State::ChunkData(remaining - take)
                    };
                }
                State::ChunkEnd => {
                    let Some(line) = take_line(buf) else {
                        return Ok(None);
                    };
                    if !line.is_empty() {
                        return Err(CodecError::Malformed("missing chunk terminator".into()));
                    }
                    self.state = State::ChunkSize;
                }
                State::Trailers => {
                    let Some(line) = take_line(buf) else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.complete()?;
                    } else {
                        tracing::trace!(trailer = %line, "ignoring trailer field");
                    }
                }
                State::Done => return Ok(None),
            }
        }
    }

    /// Decode the next event after the peer has closed the connection.
    ///
    /// Completes bodies delimited by connection close. Any other unfinished
    /// response is an error.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>, CodecError> {
        if let Some(event) = self.decode(buf)? {
            return Ok(Some(event));
        }

        match self.state {
            State::Done => Ok(None),
            State::Body if self.framing == Framing::UntilClose => {
                self.complete()?;
                Ok(self.ready.pop_front())
            }
            State::StatusLine if !self.received => Err(CodecError::Closed),
            State::StatusLine | State::Headers => Err(CodecError::Malformed(
                "connection closed before response head completed".into(),
            )),
            _ => Err(CodecError::Malformed(
                "connection closed before response body completed".into(),
            )),
        }
    }

    fn head_line(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        match take_line(buf) {
            Some(line) => {
                self.head_bytes += line.len() + 2;
                if self.head_bytes > MAX_HEAD_SIZE {
                    return Err(CodecError::Malformed("response head too large".into()));
                }
                Ok(Some(line))
            }
            None if self.head_bytes + buf.len() > MAX_HEAD_SIZE => {
                Err(CodecError::Malformed("response head too large".into()))
            }
            None => Ok(None),
        }
    }

    fn parse_field(&mut self, line: &str) -> Result<(), CodecError> {
        let Some((name, value)) = line.split_once(':') else {
            return Err(CodecError::Malformed(format!("invalid header field: {line:?}")));
        };

        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(CodecError::Malformed(format!("invalid header name: {name:?}")));
        }

        self.head.append(name, value.trim());
        Ok(())
    }

    fn finish_head(&mut self) -> Result<(), CodecError> {
        let status = self.head.status();
        if self.head.is_informational() && status != 101 {
            tracing::trace!(status, "skipping interim response");
            self.head = ResponseHeader::default();
            self.state = State::StatusLine;
            return Ok(());
        }

        let bodiless = self.head_request || self.head.is_informational();
        self.framing = if bodiless || status == 204 || status == 304 {
            Framing::Empty
        } else if self.head.is_chunked() {
            Framing::Chunked
        } else if let Some(length) = self.head.get("content-length") {
            let length = length.trim().parse().map_err(|_| {
                CodecError::Malformed(format!("invalid content-length: {length:?}"))
            })?;
            Framing::Length(length)
        } else {
            Framing::UntilClose
        };

        if self.decoding {
            self.content = ContentDecoder::for_encoding(self.head.content_encoding());
        }

        self.keep_alive = self.head.keep_alive() && self.framing != Framing::UntilClose;
        tracing::trace!(
            status,
            framing = ?self.framing,
            keep_alive = self.keep_alive,
            decoding = !self.content.is_identity(),
            "response head parsed"
        );

        let head = std::mem::take(&mut self.head);
        self.ready.push_back(Decoded::Head(head));

        match self.framing {
            Framing::Empty | Framing::Length(0) => self.complete()?,
            Framing::Chunked => self.state = State::ChunkSize,
            _ => self.state = State::Body,
        }
        Ok(())
    }

    fn body(&mut self, chunk: &[u8]) -> Result<(), CodecError> {
        self.body_seen |= !chunk.is_empty();
        let decoded = self.content.decode(chunk).map_err(CodecError::Decoding)?;
        if !decoded.is_empty() {
            self.ready.push_back(Decoded::Data(decoded));
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<(), CodecError> {
        if self.body_seen {
            let tail = self.content.finish().map_err(CodecError::Decoding)?;
            if !tail.is_empty() {
                self.ready.push_back(Decoded::Data(tail));
            }
        }
        self.ready.push_back(Decoded::Complete);
        self.state = State::Done;
        Ok(())
    }
}

/// Split one line off the front of `buf`, without its line ending.
fn take_line(buf: &mut BytesMut) -> Option<String> {
    let end = buf.iter().position(|b| *b == b'\n')?;
    let line = buf.split_to(end + 1);
    let mut line = &line[..end];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    Some(String::from_utf8_lossy(line).into_owned())
}

fn parse_status_line(line: &str) -> Result<ResponseHeader, CodecError> {
    let malformed = || CodecError::Malformed(format!("invalid status line: {line:?}"));

    let (version, rest) = line.split_once(' ').ok_or_else(malformed)?;
    let version = match version.strip_prefix("HTTP/").ok_or_else(malformed)? {
        "1.0" => Version::HTTP_10,
        "0.9" => Version::HTTP_09,
        _ => Version::HTTP_11,
    };

    let rest = rest.trim_start();
    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    if code.len() != 3 {
        return Err(malformed());
    }
    let status = code.parse::<u16>().map_err(|_| malformed())?;

    Ok(ResponseHeader::new(version, status, reason.trim()))
}
