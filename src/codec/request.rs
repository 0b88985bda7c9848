//! Request header model, bodies and wire serialization.

use std::io;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use http::Method;

use super::form::FormValue;

pub(crate) const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A request header value as supplied by the caller or a middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// Sent verbatim.
    Text(String),

    /// A `(username, password)` pair, sent as HTTP Basic credentials.
    Credentials(String, String),

    /// A structured value. `Cookie` headers encode it as `name=value;`
    /// pairs, other headers as a query string.
    Form(FormValue),

    /// Suppress the header entirely, including any default for it.
    Omit,
}

impl HeaderValue {
    /// Render the value for the named header, or `None` when omitted.
    pub fn render(&self, name: &str) -> Option<String> {
        match self {
            HeaderValue::Text(text) => Some(text.clone()),
            HeaderValue::Credentials(user, password) => Some(basic_auth(user, password)),
            HeaderValue::Form(form) if name.eq_ignore_ascii_case("cookie") => {
                Some(form.to_cookie())
            }
            HeaderValue::Form(form) => Some(form.to_query()),
            HeaderValue::Omit => None,
        }
    }

    /// The value as text, when it was supplied as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl<U: Into<String>, P: Into<String>> From<(U, P)> for HeaderValue {
    fn from((user, password): (U, P)) -> Self {
        HeaderValue::Credentials(user.into(), password.into())
    }
}

impl From<FormValue> for HeaderValue {
    fn from(value: FormValue) -> Self {
        HeaderValue::Form(value)
    }
}

/// `Basic` authorization value for a credential pair.
pub(crate) fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", Base64.encode(format!("{user}:{password}")))
}

/// Ordered request headers.
///
/// Names are case-folded on insert; each name appears once and keeps the
/// position of its first insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
}

impl Headers {
    /// An empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous value of the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<HeaderValue>) {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Set a header only when it is absent.
    pub fn insert_default(&mut self, name: impl AsRef<str>, value: impl Into<HeaderValue>) {
        if !self.contains(name.as_ref()) {
            self.insert(name, value);
        }
    }

    /// The value set for a header.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// The text value set for a header.
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::as_text)
    }

    /// Whether a value (including [`HeaderValue::Omit`]) is set.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        let idx = self
            .entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Number of headers set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no headers are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<HeaderValue>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// A request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    /// No body; `Content-Length: 0` is still sent.
    #[default]
    Empty,

    /// Literal bytes.
    Bytes(Bytes),

    /// A structured form, sent as `application/x-www-form-urlencoded`.
    Form(FormValue),

    /// A file streamed from disk.
    File(PathBuf),
}

impl Body {
    /// Whether this is [`Body::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Resolve the body into what goes on the wire, and the content type a
    /// structured body implies.
    pub(crate) async fn into_source(self) -> io::Result<(BodySource, Option<&'static str>)> {
        Ok(match self {
            Body::Empty => (BodySource::Empty, None),
            Body::Bytes(bytes) => (BodySource::Bytes(bytes), None),
            Body::Form(form) => (
                BodySource::Bytes(form.to_form().into()),
                Some(FORM_CONTENT_TYPE),
            ),
            Body::File(path) => {
                let len = tokio::fs::metadata(&path).await?.len();
                (BodySource::File { path, len }, None)
            }
        })
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Bytes(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Bytes(value.into())
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(value.into())
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Bytes(value)
    }
}

impl From<FormValue> for Body {
    fn from(value: FormValue) -> Self {
        Body::Form(value)
    }
}

/// A request query, either pre-encoded or structured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Used verbatim.
    Text(String),

    /// Encoded with `key[]` list syntax.
    Form(FormValue),
}

impl Query {
    /// The encoded query string, without a leading `?`.
    pub fn encode(&self) -> String {
        match self {
            Query::Text(text) => text.clone(),
            Query::Form(form) => form.to_query(),
        }
    }
}

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Query::Text(value.to_owned())
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Query::Text(value)
    }
}

impl From<FormValue> for Query {
    fn from(value: FormValue) -> Self {
        Query::Form(value)
    }
}

/// Body bytes as they will be written after the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BodySource {
    Empty,
    Bytes(Bytes),
    File { path: PathBuf, len: u64 },
}

impl BodySource {
    pub(crate) fn len(&self) -> u64 {
        match self {
            BodySource::Empty => 0,
            BodySource::Bytes(bytes) => bytes.len() as u64,
            BodySource::File { len, .. } => *len,
        }
    }
}

/// A serialized request head plus the body to follow it.
#[derive(Debug, Clone)]
pub(crate) struct EncodedRequest {
    pub(crate) head: Bytes,
    pub(crate) body: BodySource,
}

/// Serialize a request.
///
/// `Content-Length` is always sent unless the caller set one, and
/// `content_type` is added when the caller did not set a `Content-Type`.
pub(crate) fn encode_request(
    method: &Method,
    target: &str,
    headers: &Headers,
    body: BodySource,
    content_type: Option<&str>,
) -> EncodedRequest {
    let mut head = BytesMut::with_capacity(256);
    head.put_slice(method.as_str().as_bytes());
    head.put_u8(b' ');
    head.put_slice(target.as_bytes());
    head.put_slice(b" HTTP/1.1\r\n");

    for (name, value) in headers.iter() {
        if let Some(value) = value.render(name) {
            put_field(&mut head, &capitalize(name), &value);
        }
    }

    if !headers.contains("content-length") {
        put_field(&mut head, "Content-Length", &body.len().to_string());
    }

    if let Some(content_type) = content_type.filter(|_| !headers.contains("content-type")) {
        put_field(&mut head, "Content-Type", content_type);
    }

    head.put_slice(b"\r\n");

    EncodedRequest {
        head: head.freeze(),
        body,
    }
}

fn put_field(head: &mut BytesMut, name: &str, value: &str) {
    head.put_slice(name.as_bytes());
    head.put_slice(b": ");
    for byte in value.bytes() {
        head.put_u8(if byte == b'\r' || byte == b'\n' { b' ' } else { byte });
    }
    head.put_slice(b"\r\n");
}

/// `content-type` becomes `Content-Type`.
pub(crate) fn capitalize(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
