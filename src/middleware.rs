//! Request and response middleware.
//!
//! A [`Middleware`] declares through [`Middleware::capabilities`] which
//! phases it takes part in. Capabilities are read once, when the middleware
//! is registered, so a middleware that declares neither phase is accepted and
//! never called.
//!
//! Request middleware runs on every hop (including redirects) just before the
//! request is serialized and may rewrite its headers and body. Response
//! middleware runs once per response, after the body is complete and before
//! the redirect decision or settlement; it may mutate the response, change the
//! remaining redirect budget, or close the request.
//!
//! Middleware registered on a [`Context`](crate::Context) runs before
//! middleware registered on an individual connection, each in registration
//! order.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::codec::{Body, Headers, ResponseHeader};

/// The phases a middleware takes part in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    request: bool,
    response: bool,
}

impl Capabilities {
    /// Neither phase.
    pub const NONE: Capabilities = Capabilities {
        request: false,
        response: false,
    };

    /// Request phase only.
    pub const REQUEST: Capabilities = Capabilities {
        request: true,
        response: false,
    };

    /// Response phase only.
    pub const RESPONSE: Capabilities = Capabilities {
        request: false,
        response: true,
    };

    /// Both phases.
    pub const BOTH: Capabilities = Capabilities {
        request: true,
        response: true,
    };

    /// Whether the request phase is declared.
    pub fn request(&self) -> bool {
        self.request
    }

    /// Whether the response phase is declared.
    pub fn response(&self) -> bool {
        self.response
    }
}

/// A request/response hook.
pub trait Middleware: Send + Sync + 'static {
    /// The phases this middleware takes part in.
    fn capabilities(&self) -> Capabilities;

    /// Rewrite the outgoing request headers and body.
    fn request(
        &self,
        context: &RequestContext<'_>,
        headers: Headers,
        body: Body,
    ) -> (Headers, Body) {
        let _ = context;
        (headers, body)
    }

    /// Inspect or mutate a completed response.
    fn response(&self, response: &mut ResponseState<'_>) {
        let _ = response;
    }
}

/// What a request middleware can see about the request being sent.
#[derive(Debug)]
pub struct RequestContext<'a> {
    method: &'a Method,
    url: &'a Url,
    hop: u32,
}

impl<'a> RequestContext<'a> {
    pub(crate) fn new(method: &'a Method, url: &'a Url, hop: u32) -> Self {
        Self { method, url, hop }
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        self.method
    }

    /// URL of this hop.
    pub fn url(&self) -> &Url {
        self.url
    }

    /// Zero for the original request, incremented for each redirect hop.
    pub fn hop(&self) -> u32 {
        self.hop
    }
}

/// A completed response as seen by response middleware.
#[derive(Debug)]
pub struct ResponseState<'a> {
    header: &'a mut ResponseHeader,
    body: &'a mut Bytes,
    url: &'a Url,
    redirects: &'a mut u32,
    closed: Option<String>,
}

impl<'a> ResponseState<'a> {
    pub(crate) fn new(
        header: &'a mut ResponseHeader,
        body: &'a mut Bytes,
        url: &'a Url,
        redirects: &'a mut u32,
    ) -> Self {
        Self {
            header,
            body,
            url,
            redirects,
            closed: None,
        }
    }

    /// The response head.
    pub fn header(&self) -> &ResponseHeader {
        &*self.header
    }

    /// Mutable access to the response head.
    pub fn header_mut(&mut self) -> &mut ResponseHeader {
        &mut *self.header
    }

    /// The buffered body. Empty when the body was streamed to callbacks.
    pub fn body(&self) -> &Bytes {
        &*self.body
    }

    /// Replace the buffered body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        *self.body = body.into();
    }

    /// URL the response was received from.
    pub fn url(&self) -> &Url {
        self.url
    }

    /// Redirects that may still be followed.
    pub fn redirects(&self) -> u32 {
        *self.redirects
    }

    /// Change the number of redirects that may still be followed.
    pub fn set_redirects(&mut self, remaining: u32) {
        *self.redirects = remaining;
    }

    /// Close the request, rejecting it with `reason`. Later middleware does
    /// not run.
    pub fn close(&mut self, reason: impl Into<String>) {
        self.closed = Some(reason.into());
    }

    /// Whether [`ResponseState::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub(crate) fn take_close(&mut self) -> Option<String> {
        self.closed.take()
    }
}

/// Middleware built from a request closure, see [`request_fn`].
pub struct RequestFn<F> {
    f: F,
}

impl<F> fmt::Debug for RequestFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFn").finish()
    }
}

/// Build a request-only middleware from a closure.
pub fn request_fn<F>(f: F) -> RequestFn<F>
where
    F: Fn(&RequestContext<'_>, Headers, Body) -> (Headers, Body) + Send + Sync + 'static,
{
    RequestFn { f }
}

impl<F> Middleware for RequestFn<F>
where
    F: Fn(&RequestContext<'_>, Headers, Body) -> (Headers, Body) + Send + Sync + 'static,
{
    fn capabilities(&self) -> Capabilities {
        Capabilities::REQUEST
    }

    fn request(
        &self,
        context: &RequestContext<'_>,
        headers: Headers,
        body: Body,
    ) -> (Headers, Body) {
        (self.f)(context, headers, body)
    }
}

/// Middleware built from a response closure, see [`response_fn`].
pub struct ResponseFn<F> {
    f: F,
}

impl<F> fmt::Debug for ResponseFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFn").finish()
    }
}

/// Build a response-only middleware from a closure.
pub fn response_fn<F>(f: F) -> ResponseFn<F>
where
    F: Fn(&mut ResponseState<'_>) + Send + Sync + 'static,
{
    ResponseFn { f }
}

impl<F> Middleware for ResponseFn<F>
where
    F: Fn(&mut ResponseState<'_>) + Send + Sync + 'static,
{
    fn capabilities(&self) -> Capabilities {
        Capabilities::RESPONSE
    }

    fn response(&self, response: &mut ResponseState<'_>) {
        (self.f)(response)
    }
}

/// Ordered middleware, split by phase at registration time.
#[derive(Clone, Default)]
pub(crate) struct Pipeline {
    request: Vec<Arc<dyn Middleware>>,
    response: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .finish()
    }
}

impl Pipeline {
    pub(crate) fn register(&mut self, middleware: Arc<dyn Middleware>) {
        let capabilities = middleware.capabilities();
        if capabilities.request() {
            self.request.push(middleware.clone());
        }
        if capabilities.response() {
            self.response.push(middleware);
        }
        if capabilities == Capabilities::NONE {
            tracing::trace!("middleware declares no capabilities, it will not run");
        }
    }

    /// This pipeline followed by `other`.
    pub(crate) fn chain(&self, other: &Pipeline) -> Pipeline {
        let mut chained = self.clone();
        chained.request.extend(other.request.iter().cloned());
        chained.response.extend(other.response.iter().cloned());
        chained
    }

    pub(crate) fn apply_request(
        &self,
        context: &RequestContext<'_>,
        mut headers: Headers,
        mut body: Body,
    ) -> (Headers, Body) {
        for middleware in &self.request {
            (headers, body) = middleware.request(context, headers, body);
        }
        (headers, body)
    }

    pub(crate) fn apply_response(&self, state: &mut ResponseState<'_>) {
        for middleware in &self.response {
            middleware.response(state);
            if state.is_closed() {
                break;
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.request.clear();
        self.response.clear();
    }
}
