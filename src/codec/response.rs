//! Parsed response head.

use http::Version;

/// Status codes which, together with a `Location` header, request a redirect.
pub(crate) const REDIRECT_CODES: [u16; 5] = [301, 302, 303, 307, 308];

/// Normalize a header name for indifferent lookup.
///
/// Names are upper-cased and `-` becomes `_`, so `content-type`,
/// `Content-Type` and `CONTENT_TYPE` all address the same field.
pub fn normalize(name: &str) -> String {
    name.bytes().map(|b| char::from(fold(b))).collect()
}

fn fold(byte: u8) -> u8 {
    if byte == b'-' {
        b'_'
    } else {
        byte.to_ascii_uppercase()
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.bytes().zip(b.bytes()).all(|(x, y)| fold(x) == fold(y))
}

/// The status line and header fields of a response.
///
/// Fields are kept in arrival order with their original spelling. Lookups
/// through [`ResponseHeader::get`] are indifferent to case and to `-` versus
/// `_`, and return the last occurrence of a repeated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    version: Version,
    status: u16,
    reason: String,
    fields: Vec<(String, String)>,
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self {
            version: Version::HTTP_11,
            status: 0,
            reason: String::new(),
            fields: Vec::new(),
        }
    }
}

impl ResponseHeader {
    pub(crate) fn new(version: Version, status: u16, reason: impl Into<String>) -> Self {
        Self {
            version,
            status,
            reason: reason.into(),
            fields: Vec::new(),
        }
    }

    /// Numeric status code. Zero until a status line has been parsed.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The standard reason phrase for the status code, or `unknown`.
    pub fn http_reason(&self) -> &'static str {
        http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("unknown")
    }

    /// The reason phrase the server actually sent.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Protocol version from the status line.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Protocol version as the text after `HTTP/`.
    pub fn http_version(&self) -> &'static str {
        match self.version {
            Version::HTTP_10 => "1.0",
            Version::HTTP_09 => "0.9",
            _ => "1.1",
        }
    }

    /// All fields, in arrival order, with original name spelling.
    pub fn raw(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Number of header fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the head carries no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The last value of the named field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(field, _)| same_name(field, name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value of the named field, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(field, _)| same_name(field, name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the named field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a field, keeping earlier occurrences.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replace every occurrence of the named field with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// Remove every occurrence of the named field.
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|(field, _)| !same_name(field, name));
    }

    /// Every `Set-Cookie` value, in arrival order.
    pub fn cookies(&self) -> Vec<&str> {
        self.get_all("set-cookie").collect()
    }

    /// Declared body length, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length")?.trim().parse().ok()
    }

    /// The `Content-Type` value.
    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }

    /// The `charset` parameter of the last `Content-Type`.
    pub fn content_charset(&self) -> Option<&str> {
        self.content_type()?
            .split(';')
            .skip(1)
            .filter_map(|param| param.trim().split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
            .map(|(_, value)| value.trim().trim_matches('"'))
    }

    /// The `Content-Encoding` value.
    pub fn content_encoding(&self) -> Option<&str> {
        self.get("content-encoding")
    }

    /// The `Location` value.
    pub fn location(&self) -> Option<&str> {
        self.get("location")
    }

    /// The `ETag` value.
    pub fn etag(&self) -> Option<&str> {
        self.get("etag")
    }

    /// The `Last-Modified` value.
    pub fn last_modified(&self) -> Option<&str> {
        self.get("last-modified")
    }

    /// Whether the final transfer coding is `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.get_all("transfer-encoding")
            .flat_map(|value| value.split(','))
            .last()
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    /// Whether the server allows the connection to carry further requests.
    pub fn keep_alive(&self) -> bool {
        let mut close = false;
        let mut keep_alive = false;
        for token in self.get_all("connection").flat_map(|value| value.split(',')) {
            let token = token.trim();
            close |= token.eq_ignore_ascii_case("close");
            keep_alive |= token.eq_ignore_ascii_case("keep-alive");
        }

        match self.version {
            Version::HTTP_10 | Version::HTTP_09 => keep_alive && !close,
            _ => !close,
        }
    }

    /// Whether this is a 1xx interim response.
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }

    /// Whether the status requests a redirect and a `Location` is present.
    pub fn is_redirect(&self) -> bool {
        REDIRECT_CODES.contains(&self.status) && self.location().is_some()
    }
}
