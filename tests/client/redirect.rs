//! Redirect following, budgets and cookies across hops.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use zhttp::client::conn::SocketAddrs;
use zhttp::{ConnectionOptions, Context, Error, RequestOptions};

#[path = "../support/mod.rs"]
mod support;

use support::{BoxError, Reply, Request, Server};

/// `/r/<n>` redirects to `/r/<n - 1>`, `/r/0` answers `landed`.
fn countdown(request: &Request) -> Reply {
    let Some(n) = request.path().strip_prefix("/r/").and_then(|n| n.parse::<u32>().ok()) else {
        return support::route(request);
    };
    if n == 0 {
        Reply::ok("landed")
    } else {
        Reply::redirect(302, &format!("/r/{}", n - 1))
    }
}

/// Resolve every host name to the IPv4 loopback address.
fn loopback_context() -> Context {
    Context::builder()
        .with_resolver(tower::service_fn(|_: Box<str>| async {
            Ok::<_, io::Error>(SocketAddrs::from_iter([SocketAddr::from(([127, 0, 0, 1], 0))]))
        }))
        .build()
}

#[tokio::test]
async fn follows_redirects_within_budget() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(countdown).await;
    let connection = Context::new().connection(&server.url("/r/3"), ConnectionOptions::default())?;

    let response = connection
        .get(RequestOptions::new().redirects(3))
        .finish()
        .await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "landed");
    assert_eq!(response.redirects(), 3);
    assert_eq!(response.last_effective_url().as_str(), server.url("/r/0"));

    let targets: Vec<_> = server.requests().into_iter().map(|r| r.target).collect();
    assert_eq!(targets, ["/r/3", "/r/2", "/r/1", "/r/0"]);
    Ok(())
}

#[tokio::test]
async fn budget_exhausted() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(countdown).await;
    let connection = Context::new().connection(&server.url("/r/3"), ConnectionOptions::default())?;

    let response = connection
        .get(RequestOptions::new().redirects(1))
        .finish()
        .await?;
    assert_eq!(response.status(), 302);
    assert_eq!(response.redirects(), 1);
    assert_eq!(response.last_effective_url().as_str(), server.url("/r/2"));
    assert_eq!(response.header().location(), Some(server.url("/r/1").as_str()));
    Ok(())
}

#[tokio::test]
async fn no_redirects_by_default() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(countdown).await;
    let connection = Context::new().connection(&server.url("/r/1"), ConnectionOptions::default())?;

    let client = connection.get(RequestOptions::new());
    let response = client.finish().await?;
    assert_eq!(response.status(), 302);
    assert_eq!(response.redirects(), 0);
    assert_eq!(client.redirects(), 0);
    assert_eq!(server.requests().len(), 1);
    Ok(())
}

#[tokio::test]
async fn header_callbacks_see_each_hop() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(countdown).await;
    let connection = Context::new().connection(&server.url("/r/2"), ConnectionOptions::default())?;

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let client = connection.get(RequestOptions::new().redirects(5));
    let seen = statuses.clone();
    client.headers(move |header| seen.lock().push(header.status()));

    let response = client.finish().await?;
    assert_eq!(response.redirects(), 2);
    assert_eq!(*statuses.lock(), vec![302, 302, 200]);
    Ok(())
}

#[tokio::test]
async fn keepalive_redirects_share_a_socket() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(countdown).await;
    let connection = Context::new().connection(&server.url("/r/2"), ConnectionOptions::default())?;

    let response = connection
        .get(RequestOptions::new().redirects(2).keepalive(true))
        .finish()
        .await?;
    assert_eq!(response.text(), "landed");
    assert_eq!(server.connections(), 1);
    Ok(())
}

#[tokio::test]
async fn redirect_to_another_port() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let target = support::app().await;
    let location = target.url("/");
    let origin = Server::start(move |_| Reply::redirect(301, &location)).await;

    let connection = Context::new().connection(&origin.url("/"), ConnectionOptions::default())?;
    let response = connection
        .get(RequestOptions::new().redirects(1))
        .finish()
        .await?;

    assert_eq!(response.text(), "Hello, World!");
    assert_eq!(response.last_effective_url().port(), Some(target.port()));
    assert_eq!(origin.requests().len(), 1);
    let host = format!("127.0.0.1:{}", target.port());
    assert_eq!(target.requests()[0].header("host"), Some(host.as_str()));
    Ok(())
}

#[tokio::test]
async fn see_other_keeps_method_and_body() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(|request| match request.path() {
        "/submit" => Reply::redirect(303, "/"),
        _ => support::route(request),
    })
    .await;
    let connection =
        Context::new().connection(&server.url("/submit"), ConnectionOptions::default())?;

    let response = connection
        .post(RequestOptions::new().body("payload").redirects(1))
        .finish()
        .await?;
    assert_eq!(response.text(), "payload");

    let requests = server.requests();
    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].body, b"payload");
    Ok(())
}

#[tokio::test]
async fn location_without_host() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(|_| Reply::redirect(301, "http://")).await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;

    let error = connection
        .get(RequestOptions::new().redirects(1))
        .finish()
        .await
        .unwrap_err();
    assert!(matches!(error, Error::LocationFormat), "{error:?}");
    assert_eq!(error.to_string(), "Location header format error");
    Ok(())
}

#[tokio::test]
async fn unfollowed_bad_location_is_a_response() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(|_| Reply::redirect(301, "http://")).await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;

    let response = connection.get(RequestOptions::new()).finish().await?;
    assert_eq!(response.status(), 301);
    assert_eq!(response.header().location(), Some("http://"));
    Ok(())
}

#[tokio::test]
async fn failed_hop_keeps_redirect_count() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let location = format!("http://127.0.0.1:{port}/");
    let server = Server::start(move |_| Reply::redirect(302, &location)).await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;

    let client = connection.get(RequestOptions::new().redirects(2));
    let error = client.finish().await.unwrap_err();
    assert!(matches!(error, Error::Connect(_)), "{error:?}");
    assert_eq!(client.redirects(), 0);
    assert_eq!(client.response_header().status(), 302);
    Ok(())
}

#[tokio::test]
async fn cookies_follow_redirects_on_same_host() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let target = support::app().await;
    let location = target.url("/echo_cookie");
    let origin = Server::start(move |_| {
        Reply::new(
            302,
            "Found",
            &[("Set-Cookie", "id=1; path=/"), ("Location", location.as_str())],
            "",
        )
    })
    .await;

    let context = Context::new();
    let connection = context.connection(&origin.url("/"), ConnectionOptions::default())?;
    let response = connection
        .get(RequestOptions::new().redirects(1))
        .finish()
        .await?;

    // Cookies match by host name, whatever the port.
    assert_eq!(response.text(), "id=1");
    assert_eq!(response.cookies(), ["id=1".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn cookies_stay_with_their_host() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let target = support::app().await;
    let location = format!("http://localhost:{}/echo_cookie", target.port());
    let origin = Server::start(move |_| {
        Reply::new(
            302,
            "Found",
            &[("Set-Cookie", "id=1; path=/"), ("Location", location.as_str())],
            "",
        )
    })
    .await;

    let context = loopback_context();
    let connection = context.connection(&origin.url("/"), ConnectionOptions::default())?;
    let response = connection
        .get(RequestOptions::new().redirects(1))
        .finish()
        .await?;

    assert_eq!(response.text(), "none");
    assert!(response.cookies().is_empty());
    assert_eq!(response.last_effective_url().host_str(), Some("localhost"));
    assert_eq!(context.cookie_jar().len(), 1);
    Ok(())
}

#[tokio::test]
async fn caller_cookies_are_sent_on_every_hop() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(|request| match request.path() {
        "/login" => Reply::new(
            302,
            "Found",
            &[("Set-Cookie", "another_id=1; path=/"), ("Location", "/echo_cookie")],
            "",
        ),
        _ => support::route(request),
    })
    .await;

    let context = Context::new();
    let connection = context.connection(&server.url("/login"), ConnectionOptions::default())?;
    let response = connection
        .get(RequestOptions::new().header("Cookie", "id=2;").redirects(1))
        .finish()
        .await?;

    assert_eq!(response.text(), "id=2; another_id=1");
    assert_eq!(response.cookies(), ["id=2;".to_owned(), "another_id=1".to_owned()]);
    assert_eq!(server.requests()[0].header("cookie"), Some("id=2;"));

    let response = connection
        .get(RequestOptions::new().header("Cookie", "id=2;").pass_cookies(false).redirects(1))
        .finish()
        .await?;
    assert_eq!(response.text(), "id=2;");
    assert_eq!(response.cookies(), ["id=2;".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn relative_location_is_followed() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = support::app().await;
    let connection =
        Context::new().connection(&server.url("/relative-location"), ConnectionOptions::default())?;

    let response = connection
        .get(RequestOptions::new().redirects(1))
        .finish()
        .await?;
    assert_eq!(response.text(), "Forwarded");
    assert_eq!(response.last_effective_url().as_str(), server.url("/forwarded"));
    Ok(())
}
