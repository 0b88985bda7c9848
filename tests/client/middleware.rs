//! Request and response middleware around real requests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use zhttp::middleware::{
    request_fn, response_fn, Capabilities, Middleware, RequestContext, ResponseState,
};
use zhttp::{Body, ConnectionOptions, Context, Headers, RequestOptions};

#[path = "../support/mod.rs"]
mod support;

use support::{BoxError, Reply, Server};

/// Records the order it runs in, in both phases.
struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Recorder {
    fn capabilities(&self) -> Capabilities {
        Capabilities::BOTH
    }

    fn request(
        &self,
        context: &RequestContext<'_>,
        mut headers: Headers,
        body: Body,
    ) -> (Headers, Body) {
        self.log.lock().push(format!("request {} hop {}", self.name, context.hop()));
        headers.insert(format!("x-{}", self.name), "1");
        (headers, body)
    }

    fn response(&self, response: &mut ResponseState<'_>) {
        self.log
            .lock()
            .push(format!("response {} {}", self.name, response.header().status()));
    }
}

/// Declares no phases, so it must never be called.
struct Silent(Arc<AtomicUsize>);

impl Middleware for Silent {
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    fn request(&self, _: &RequestContext<'_>, headers: Headers, body: Body) -> (Headers, Body) {
        self.0.fetch_add(1, Ordering::SeqCst);
        (headers, body)
    }

    fn response(&self, _: &mut ResponseState<'_>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn request_middleware_rewrites_headers_and_body() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = support::app().await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;
    connection.use_middleware(request_fn(|context, mut headers, _| {
        assert_eq!(*context.method(), http::Method::POST);
        headers.insert("authorization", ("user", "pass"));
        (headers, Body::from("rewritten"))
    }));

    let response = connection
        .post(RequestOptions::new().body("original"))
        .finish()
        .await?;
    assert_eq!(response.text(), "rewritten");

    let request = &server.requests()[0];
    assert_eq!(request.header("authorization"), Some("Basic dXNlcjpwYXNz"));
    assert_eq!(request.header("content-length"), Some("9"));
    Ok(())
}

#[tokio::test]
async fn response_middleware_rewrites_response() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = support::app().await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;
    connection.use_middleware(response_fn(|response| {
        let upper = response.body().to_ascii_uppercase();
        response.set_body(upper);
        response.header_mut().set("X-Rewritten", "yes");
    }));

    let client = connection.get(RequestOptions::new());
    let response = client.finish().await?;
    assert_eq!(response.text(), "HELLO, WORLD!");
    assert_eq!(response.header().get("x-rewritten"), Some("yes"));
    assert_eq!(client.response(), "HELLO, WORLD!");
    Ok(())
}

#[tokio::test]
async fn context_middleware_runs_first() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = support::app().await;
    let log = Arc::new(Mutex::new(Vec::new()));

    let context = Context::new();
    context.use_middleware(Recorder {
        name: "global",
        log: log.clone(),
    });
    let connection = context.connection(&server.url("/"), ConnectionOptions::default())?;
    connection.use_middleware(Recorder {
        name: "local",
        log: log.clone(),
    });

    connection.get(RequestOptions::new()).finish().await?;
    assert_eq!(
        *log.lock(),
        vec![
            "request global hop 0",
            "request local hop 0",
            "response global 200",
            "response local 200",
        ]
    );

    let request = &server.requests()[0];
    assert_eq!(request.header("x-global"), Some("1"));
    assert_eq!(request.header("x-local"), Some("1"));
    Ok(())
}

#[tokio::test]
async fn context_middleware_is_snapshotted() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = support::app().await;
    let log = Arc::new(Mutex::new(Vec::new()));

    let context = Context::new();
    let early = context.connection(&server.url("/"), ConnectionOptions::default())?;
    context.use_middleware(Recorder {
        name: "late",
        log: log.clone(),
    });
    let later = context.connection(&server.url("/"), ConnectionOptions::default())?;

    early.get(RequestOptions::new()).finish().await?;
    assert!(log.lock().is_empty());

    later.get(RequestOptions::new()).finish().await?;
    assert_eq!(log.lock().len(), 2);
    Ok(())
}

#[tokio::test]
async fn middleware_without_capabilities_never_runs() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = support::app().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;
    connection.use_middleware(Silent(calls.clone()));

    connection.get(RequestOptions::new()).finish().await?;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn request_middleware_runs_on_every_hop() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(|request| match request.path() {
        "/start" => Reply::redirect(302, "/"),
        _ => support::route(request),
    })
    .await;

    let log = Arc::new(Mutex::new(Vec::new()));
    let connection =
        Context::new().connection(&server.url("/start"), ConnectionOptions::default())?;
    connection.use_middleware(Recorder {
        name: "hops",
        log: log.clone(),
    });

    connection
        .get(RequestOptions::new().redirects(1))
        .finish()
        .await?;
    assert_eq!(
        *log.lock(),
        vec![
            "request hops hop 0",
            "response hops 302",
            "request hops hop 1",
            "response hops 200",
        ]
    );
    assert!(server.requests().iter().all(|r| r.header("x-hops") == Some("1")));
    Ok(())
}

#[tokio::test]
async fn response_middleware_controls_redirect_budget() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(|request| match request.path() {
        "/start" => Reply::redirect(302, "/"),
        _ => support::route(request),
    })
    .await;
    let connection =
        Context::new().connection(&server.url("/start"), ConnectionOptions::default())?;

    // Grant a redirect the caller did not ask for.
    connection.use_middleware(response_fn(|response| {
        if response.header().is_redirect() && response.redirects() == 0 {
            response.set_redirects(1);
        }
    }));

    let response = connection.get(RequestOptions::new()).finish().await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.redirects(), 1);

    // And take one away.
    let stopper = Context::new().connection(&server.url("/start"), ConnectionOptions::default())?;
    stopper.use_middleware(response_fn(|response| response.set_redirects(0)));

    let response = stopper
        .get(RequestOptions::new().redirects(5))
        .finish()
        .await?;
    assert_eq!(response.status(), 302);
    assert_eq!(response.redirects(), 0);
    Ok(())
}

#[tokio::test]
async fn response_middleware_can_close() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = support::app().await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;

    let after = Arc::new(AtomicUsize::new(0));
    connection.use_middleware(response_fn(|response| response.close("rejected by middleware")));
    let counter = after.clone();
    connection.use_middleware(response_fn(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let error = connection.get(RequestOptions::new()).finish().await.unwrap_err();
    assert!(error.is_closed());
    assert_eq!(error.to_string(), "rejected by middleware");
    assert_eq!(after.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn reset_forgets_global_middleware() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = support::app().await;
    let log = Arc::new(Mutex::new(Vec::new()));

    let context = Context::new();
    context.use_middleware(Recorder {
        name: "global",
        log: log.clone(),
    });
    context.reset();

    let connection = context.connection(&server.url("/"), ConnectionOptions::default())?;
    connection.get(RequestOptions::new()).finish().await?;
    assert!(log.lock().is_empty());
    Ok(())
}
