//! Drives one logical request through its hops.

use std::sync::Arc;

use http::Method;
use tokio::sync::mpsc;
use url::Url;

use super::conn::{Dispatch, Endpoint, Event};
use super::redirect::{Decision, RedirectController};
use super::{ConnectionRef, Error, HttpClient, RequestOptions};
use crate::codec::request::encode_request;
use crate::codec::{HeaderValue, Headers};
use crate::middleware::{Pipeline, RequestContext, ResponseState};
use crate::uri;

/// Fails the client if its driver is dropped before settling it, whether
/// by a panic or by runtime shutdown.
struct Unsettled(HttpClient);

impl Drop for Unsettled {
    fn drop(&mut self) {
        if !self.0.is_settled() {
            tracing::warn!("request driver stopped before the request settled");
            self.0.fail(Error::Aborted);
        }
    }
}

/// Builds each hop, sends it, collects the response, applies response
/// middleware and settles the client.
pub(crate) struct RequestClient {
    client: HttpClient,
    connection: Arc<ConnectionRef>,
    method: Method,
    options: RequestOptions,
    pipeline: Pipeline,
    redirect: RedirectController,
    hop: u32,
}

impl RequestClient {
    pub(crate) fn new(
        client: HttpClient,
        connection: Arc<ConnectionRef>,
        method: Method,
        options: RequestOptions,
        url: Url,
    ) -> Self {
        let pipeline = connection.pipeline();
        let redirect = RedirectController::new(url, options.redirects);
        Self {
            client,
            connection,
            method,
            options,
            pipeline,
            redirect,
            hop: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let _unsettled = Unsettled(self.client.clone());
        loop {
            match self.send_hop().await {
                Ok(Decision::Follow(next)) => {
                    tracing::trace!(%next, "next hop");
                    self.hop += 1;
                }
                Ok(Decision::Finish) => break,
                Err(error) => {
                    self.redirect.reject();
                    self.client.fail(error);
                    break;
                }
            }
        }

        tracing::trace!(
            state = ?self.redirect.state(),
            url = %self.redirect.effective(),
            "request driver finished"
        );
    }

    async fn send_hop(&mut self) -> Result<Decision, Error> {
        let url = self.redirect.current().clone();
        let endpoint = Endpoint::for_url(&url, self.connection.options.proxy.as_ref())?;
        tracing::debug!(method = %self.method, %url, hop = self.hop, "sending request");

        let headers = self.build_headers(&url, &endpoint);
        let context = RequestContext::new(&self.method, &url, self.hop);
        let (headers, body) = self
            .pipeline
            .apply_request(&context, headers, self.options.body.clone());

        let (source, content_type) = body.into_source().await.map_err(Error::body)?;
        let target = if endpoint.is_forward_proxy() {
            uri::absolute_target(&url)
        } else {
            uri::request_target(&url)
        };
        let request = encode_request(&self.method, &target, &headers, source, content_type);

        if self.client.is_settled() {
            return Ok(Decision::Finish);
        }

        let connection = self.connection.manager.acquire(
            &endpoint,
            &self.connection.options,
            &self.connection.context.resolver(),
        );
        self.client.set_connection(connection.clone());

        let (events, mut receiver) = mpsc::unbounded_channel();
        connection.send(Dispatch {
            request,
            head_request: self.method == Method::HEAD,
            idempotent: self.method.is_idempotent(),
            keepalive: self.options.keepalive,
            decoding: self.options.decoding,
            events,
        });

        while let Some(event) = receiver.recv().await {
            // Closed by the caller: drop the rest of the response.
            if self.client.is_settled() {
                return Ok(Decision::Finish);
            }

            match event {
                Event::Head(mut header) => {
                    if let Some(location) = header.location() {
                        if let Ok(absolute) = uri::resolve_location(&url, location) {
                            header.set("Location", absolute.as_str());
                        }
                    }

                    self.redirect.on_response();
                    self.connection.context.cookie_jar().record(&header, &url);
                    let peer = connection.peer().map(|addr| addr.ip());
                    self.client
                        .on_head(header, &url, self.redirect.followed(), peer);
                }
                Event::Data(data) => self.client.on_data(&data),
                Event::Failed(error) => return Err(error),
                Event::Complete(ack) => {
                    let decision = self.complete(&url);
                    let _ = ack.send(());
                    return decision;
                }
            }
        }

        Err(Error::ConnectionClosed)
    }

    /// Request headers for a hop, before request middleware runs.
    fn build_headers(&self, url: &Url, endpoint: &Endpoint) -> Headers {
        let mut headers = Headers::new();
        if endpoint.is_forward_proxy() {
            if let Some((user, password)) = self
                .connection
                .options
                .proxy
                .as_ref()
                .and_then(|proxy| proxy.authorization.as_ref())
            {
                headers.insert(
                    "proxy-authorization",
                    HeaderValue::Credentials(user.clone(), password.clone()),
                );
            }
        }

        for (name, value) in self.options.headers.iter() {
            headers.insert(name, value.clone());
        }

        let mut cookies: Vec<String> = headers
            .get("cookie")
            .and_then(|value| value.render("cookie"))
            .filter(|value| !value.is_empty())
            .into_iter()
            .collect();
        let from_caller = cookies.len();
        if self.options.pass_cookies {
            cookies.extend(self.connection.context.cookie_jar().matching(url));
        }
        if cookies.len() > from_caller {
            let joined = cookies.join("; ").replace(";;", ";");
            headers.insert("cookie", joined);
        }
        self.client.set_cookies(cookies);

        if !self.options.keepalive {
            headers.insert_default("connection", "close");
        }
        headers.insert_default("host", uri::host_header(url));
        headers.insert_default("user-agent", self.connection.context.user_agent());
        if let Some((user, password)) = uri::credentials(url) {
            headers.insert_default("authorization", HeaderValue::Credentials(user, password));
        }
        headers
    }

    /// Run response middleware over the completed response, then either
    /// settle the client or pick the next hop.
    fn complete(&mut self, url: &Url) -> Result<Decision, Error> {
        let (mut header, mut body) = self.client.take_parts();
        let closed = {
            let mut state =
                ResponseState::new(&mut header, &mut body, url, self.redirect.remaining_mut());
            self.pipeline.apply_response(&mut state);
            state.take_close()
        };
        self.client.store_parts(header.clone(), &body);

        if let Some(reason) = closed {
            self.client.close(reason);
            return Ok(Decision::Finish);
        }

        let decision = self.redirect.decide(&header)?;
        if decision == Decision::Finish {
            tracing::debug!(
                status = header.status(),
                redirects = self.redirect.followed(),
                "request complete"
            );
            self.client.succeed(header, body);
        }
        Ok(decision)
    }
}
