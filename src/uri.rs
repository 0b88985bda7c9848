//! URL helpers for request targets, `Host` values and `Location` resolution.

use percent_encoding::percent_decode_str;
use url::{Host, Url};

use crate::client::Error;
use crate::codec::Query;

/// Parse a request URL. Only `http` and `https` URLs with a host are
/// accepted.
pub(crate) fn parse(input: &str) -> Result<Url, Error> {
    let url = Url::parse(input).map_err(|_| Error::InvalidUrl(input.to_owned()))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(Error::UnsupportedScheme(scheme.to_owned())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidUrl(input.to_owned()));
    }
    Ok(url)
}

/// Apply a per-request path override and merge an extra query in front of
/// the URL's own query.
pub(crate) fn with_request(url: &Url, path: Option<&str>, query: Option<&Query>) -> Url {
    let mut url = url.clone();
    if let Some(path) = path {
        url.set_path(path);
    }

    if let Some(query) = query {
        let extra = query.encode();
        let merged = [Some(extra.as_str()), url.query()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(if merged.is_empty() { None } else { Some(merged.as_str()) });
    }
    url
}

/// Origin-form request target: path plus query.
pub(crate) fn request_target(url: &Url) -> String {
    let mut target = url.path().to_owned();
    if target.is_empty() {
        target.push('/');
    }
    match url.query() {
        Some(query) if !query.is_empty() => {
            target.push('?');
            target.push_str(query);
        }
        _ => {}
    }
    target
}

/// Absolute-form request target, used when talking to a forward proxy.
pub(crate) fn absolute_target(url: &Url) -> String {
    format!("{}://{}{}", url.scheme(), host_header(url), request_target(url))
}

/// `Host` header value: host, plus the port when it is not the scheme's
/// default.
pub(crate) fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

/// Host name or address literal suitable for resolution (IPv6 without
/// brackets).
pub(crate) fn resolvable_host(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(domain.to_owned()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

/// Basic credentials embedded in the URL's userinfo.
pub(crate) fn credentials(url: &Url) -> Option<(String, String)> {
    if url.username().is_empty() {
        return None;
    }
    let decode = |part: &str| percent_decode_str(part).decode_utf8_lossy().into_owned();
    Some((
        decode(url.username()),
        url.password().map(decode).unwrap_or_default(),
    ))
}

/// Resolve a `Location` value against the URL of the request that produced
/// it.
///
/// Relative references are joined onto `base`. Absolute references must
/// carry a host, otherwise this is a [`Error::LocationFormat`].
pub(crate) fn resolve_location(base: &Url, location: &str) -> Result<Url, Error> {
    let location = location.trim();
    let resolved = if has_scheme(location) {
        Url::parse(location).map_err(|_| Error::LocationFormat)?
    } else {
        base.join(location).map_err(|_| Error::LocationFormat)?
    };

    if resolved.host_str().map_or(true, str::is_empty) {
        return Err(Error::LocationFormat);
    }
    Ok(resolved)
}

fn has_scheme(reference: &str) -> bool {
    let Some((scheme, _)) = reference.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
