use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::Method;
use parking_lot::Mutex;
use url::Url;

use super::conn::Connection;
use super::{Error, Response};
use crate::codec::ResponseHeader;
use crate::deferred::{Deferred, Outcome, Status};

type HeaderHandler = Box<dyn FnMut(&ResponseHeader) + Send>;
type StreamHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Handle to one in-progress request.
///
/// The request settles exactly once: callbacks receive the final
/// [`Response`], errbacks the [`Error`]. Non-2xx statuses are successful
/// responses. Handles are cheap to clone and all clones observe the same
/// request.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientShared>,
}

struct ClientShared {
    method: Method,
    deferred: Deferred<Response, Error>,
    state: Mutex<ClientState>,
    header_handlers: Mutex<Vec<HeaderHandler>>,
    stream_handlers: Mutex<Vec<StreamHandler>>,
}

struct ClientState {
    header: ResponseHeader,
    body: BytesMut,
    redirects: u32,
    last_effective_url: Url,
    cookies: Vec<String>,
    peer: Option<IpAddr>,
    connection: Option<Connection>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("HttpClient")
            .field("method", &self.inner.method)
            .field("url", &state.last_effective_url.as_str())
            .field("status", &self.inner.deferred.status())
            .finish()
    }
}

impl HttpClient {
    pub(crate) fn new(method: Method, url: Url) -> Self {
        Self {
            inner: Arc::new(ClientShared {
                method,
                deferred: Deferred::new(),
                state: Mutex::new(ClientState {
                    header: ResponseHeader::default(),
                    body: BytesMut::new(),
                    redirects: 0,
                    last_effective_url: url,
                    cookies: Vec::new(),
                    peer: None,
                    connection: None,
                }),
                header_handlers: Mutex::new(Vec::new()),
                stream_handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Run `handler` with the final response. Runs immediately when the
    /// request has already succeeded.
    pub fn callback<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&Response) + Send + 'static,
    {
        self.inner.deferred.callback(handler);
        self
    }

    /// Run `handler` with the error. Runs immediately when the request has
    /// already failed.
    pub fn errback<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        self.inner.deferred.errback(handler);
        self
    }

    /// Run `handler` with every response head, including those of
    /// redirects, as soon as it is parsed.
    pub fn headers<F>(&self, handler: F) -> &Self
    where
        F: FnMut(&ResponseHeader) + Send + 'static,
    {
        self.inner.header_handlers.lock().push(Box::new(handler));
        self
    }

    /// Receive body chunks as they are decoded instead of buffering them.
    ///
    /// Once a stream handler is registered, chunks are no longer collected
    /// into [`Response::body`].
    pub fn stream<F>(&self, handler: F) -> &Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.inner.stream_handlers.lock().push(Box::new(handler));
        self
    }

    /// Close the request and its connection, failing it with
    /// [`Error::Closed`] carrying `reason`.
    ///
    /// Has no effect on a request that already settled.
    pub fn close(&self, reason: impl Into<String>) {
        if self.inner.deferred.is_settled() {
            return;
        }

        let reason = reason.into();
        let connection = self.inner.state.lock().connection.take();
        if let Some(connection) = connection {
            connection.close(reason.clone());
        }
        tracing::debug!(%reason, "request closed");
        self.inner.deferred.fail(Error::Closed(reason));
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// Head of the most recent response. Status `0` before one arrives.
    pub fn response_header(&self) -> ResponseHeader {
        self.inner.state.lock().header.clone()
    }

    /// Body buffered so far for the most recent response.
    pub fn response(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.state.lock().body)
    }

    /// The error, once the request has failed.
    pub fn error(&self) -> Option<Error> {
        match &*self.inner.deferred.outcome()? {
            Outcome::Rejected(error) => Some(error.clone()),
            Outcome::Fulfilled(_) => None,
        }
    }

    /// Redirects followed so far.
    pub fn redirects(&self) -> u32 {
        self.inner.state.lock().redirects
    }

    /// URL of the most recent response, or the request URL before one
    /// arrives.
    pub fn last_effective_url(&self) -> Url {
        self.inner.state.lock().last_effective_url.clone()
    }

    /// Cookies sent with the most recent hop.
    pub fn cookies(&self) -> Vec<String> {
        self.inner.state.lock().cookies.clone()
    }

    /// Address of the server, once connected.
    pub fn peer(&self) -> Option<IpAddr> {
        self.inner.state.lock().peer
    }

    /// Settlement status.
    pub fn status(&self) -> Status {
        self.inner.deferred.status()
    }

    /// The deferred settled by this request, for use with
    /// [`MultiRequest`](crate::MultiRequest).
    pub fn deferred(&self) -> &Deferred<Response, Error> {
        &self.inner.deferred
    }

    /// Wait for the request to settle.
    pub async fn finish(&self) -> Result<Response, Error> {
        self.inner.deferred.wait().await
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.inner.deferred.is_settled()
    }

    pub(crate) fn set_connection(&self, connection: Connection) {
        self.inner.state.lock().connection = Some(connection);
    }

    pub(crate) fn set_cookies(&self, cookies: Vec<String>) {
        self.inner.state.lock().cookies = cookies;
    }

    pub(crate) fn on_head(
        &self,
        header: ResponseHeader,
        url: &Url,
        redirects: u32,
        peer: Option<IpAddr>,
    ) {
        {
            let mut state = self.inner.state.lock();
            state.header = header.clone();
            state.body.clear();
            state.last_effective_url = url.clone();
            state.redirects = redirects;
            if peer.is_some() {
                state.peer = peer;
            }
        }

        let mut handlers = std::mem::take(&mut *self.inner.header_handlers.lock());
        for handler in &mut handlers {
            handler(&header);
        }
        restore(&self.inner.header_handlers, handlers);
    }

    pub(crate) fn on_data(&self, data: &Bytes) {
        let mut handlers = std::mem::take(&mut *self.inner.stream_handlers.lock());
        if handlers.is_empty() {
            self.inner.state.lock().body.extend_from_slice(data);
            return;
        }

        for handler in &mut handlers {
            handler(data);
        }
        restore(&self.inner.stream_handlers, handlers);
    }

    /// The current response head and body, for response middleware.
    pub(crate) fn take_parts(&self) -> (ResponseHeader, Bytes) {
        let mut state = self.inner.state.lock();
        let body = std::mem::take(&mut state.body).freeze();
        (state.header.clone(), body)
    }

    /// Store the (possibly rewritten) response head and body.
    pub(crate) fn store_parts(&self, header: ResponseHeader, body: &Bytes) {
        let mut state = self.inner.state.lock();
        state.header = header;
        state.body = BytesMut::from(&body[..]);
    }

    pub(crate) fn succeed(&self, header: ResponseHeader, body: Bytes) {
        let response = {
            let mut state = self.inner.state.lock();
            state.connection = None;
            Response {
                header,
                body,
                url: state.last_effective_url.clone(),
                redirects: state.redirects,
                cookies: state.cookies.clone(),
                peer: state.peer,
            }
        };
        self.inner.deferred.succeed(response);
    }

    pub(crate) fn fail(&self, error: Error) {
        self.inner.state.lock().connection = None;
        if self.inner.deferred.fail(error) {
            tracing::debug!("request failed");
        }
    }
}

/// Put handlers back, ahead of any registered while they were running.
fn restore<H>(slot: &Mutex<Vec<H>>, mut handlers: Vec<H>) {
    let mut slot = slot.lock();
    handlers.append(&mut slot);
    *slot = handlers;
}
