//! Session cookie storage.
//!
//! Cookies are recorded from every response's `Set-Cookie` headers and
//! matched against later requests by host name, ignoring the port. A cookie
//! without a `Domain` attribute only matches the exact host that set it; an
//! explicit `Domain` also matches its subdomains.

use cookie::time::OffsetDateTime;
use cookie::Cookie;
use url::Url;

use crate::codec::ResponseHeader;

/// A cookie held by a [`CookieJar`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    host_only: bool,
    path: String,
    secure: bool,
    expires: Option<OffsetDateTime>,
}

impl StoredCookie {
    /// Cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Domain the cookie is scoped to.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Path prefix the cookie is scoped to.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();

        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            host == self.domain || host.ends_with(&format!(".{}", self.domain))
        };

        domain_ok
            && path_matches(&self.path, url.path())
            && (!self.secure || url.scheme() == "https")
    }

    fn same_slot(&self, other: &StoredCookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

/// Accumulated cookies for a session.
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: Vec<StoredCookie>,
}

impl CookieJar {
    /// An empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every `Set-Cookie` of a response received from `url`.
    pub fn record(&mut self, header: &ResponseHeader, url: &Url) {
        for value in header.cookies() {
            if !self.store(value, url) {
                tracing::debug!(cookie = %value, "ignoring unusable set-cookie");
            }
        }
    }

    /// Store a single `Set-Cookie` value received from `url`.
    ///
    /// Returns `false` when the value cannot be parsed or names a domain the
    /// host may not set. An already-expired cookie removes any stored cookie
    /// it replaces.
    pub fn store(&mut self, set_cookie: &str, url: &Url) -> bool {
        let Ok(parsed) = Cookie::parse(set_cookie.to_owned()) else {
            return false;
        };
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };

        let (domain, host_only) = match parsed.domain().map(str::to_ascii_lowercase) {
            Some(domain) if host == domain || host.ends_with(&format!(".{domain}")) => {
                (domain, false)
            }
            Some(_) => return false,
            None => (host, true),
        };

        let now = OffsetDateTime::now_utc();
        let expires = match parsed.max_age() {
            // Past the end of the calendar: never expires.
            Some(max_age) => match now.checked_add(max_age) {
                Some(expires) => Some(expires),
                None if max_age.is_negative() => Some(now),
                None => None,
            },
            None => parsed.expires_datetime(),
        };

        let cookie = StoredCookie {
            name: parsed.name().to_owned(),
            value: parsed.value().to_owned(),
            domain,
            host_only,
            path: parsed
                .path()
                .filter(|path| path.starts_with('/'))
                .map_or_else(|| default_path(url), str::to_owned),
            secure: parsed.secure().unwrap_or(false),
            expires,
        };

        self.cookies.retain(|stored| !stored.same_slot(&cookie));
        if !cookie.is_expired(now) {
            self.cookies.push(cookie);
        }
        true
    }

    /// `name=value` pairs for every live cookie eligible for `url`.
    ///
    /// Expired cookies are evicted.
    pub fn matching(&mut self, url: &Url) -> Vec<String> {
        let now = OffsetDateTime::now_utc();
        self.cookies.retain(|cookie| !cookie.is_expired(now));
        self.cookies
            .iter()
            .filter(|cookie| cookie.matches(url))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect()
    }

    /// Iterate over stored cookies.
    pub fn iter(&self) -> impl Iterator<Item = &StoredCookie> {
        self.cookies.iter()
    }

    /// Number of stored cookies.
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Whether the jar is empty.
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Forget every cookie.
    pub fn clear(&mut self) {
        self.cookies.clear();
    }
}

/// RFC 6265 default-path: the directory of the request path.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(idx) => path[..idx].to_owned(),
    }
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/')))
}
