//! Plain HTTP requests through a forward proxy.

use zhttp::{ConnectionOptions, Context, Proxy, RequestOptions};

#[path = "../support/mod.rs"]
mod support;

use support::{BoxError, Reply, Server};

#[tokio::test]
async fn absolute_target_through_proxy() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let proxy = Server::start(|request| Reply::ok(&request.target)).await;
    let options = ConnectionOptions::new().with_proxy(Proxy::new("127.0.0.1", proxy.port()));
    let connection = Context::new().connection("http://upstream.test:8080/path?q=1", options)?;

    let response = connection.get(RequestOptions::new()).finish().await?;
    assert_eq!(response.text(), "http://upstream.test:8080/path?q=1");

    let request = &proxy.requests()[0];
    assert_eq!(request.header("host"), Some("upstream.test:8080"));
    assert_eq!(request.header("proxy-authorization"), None);
    Ok(())
}

#[tokio::test]
async fn proxy_credentials() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let proxy = Server::start(|_| Reply::ok("proxied")).await;
    let options = ConnectionOptions::new()
        .with_proxy(Proxy::new("127.0.0.1", proxy.port()).with_authorization("user", "name"));
    let connection = Context::new().connection("http://upstream.test/", options)?;

    let response = connection.get(RequestOptions::new()).finish().await?;
    assert_eq!(response.text(), "proxied");
    assert_eq!(response.last_effective_url().as_str(), "http://upstream.test/");

    let request = &proxy.requests()[0];
    assert_eq!(request.target, "http://upstream.test/");
    assert_eq!(request.header("proxy-authorization"), Some("Basic dXNlcjpuYW1l"));
    assert_eq!(request.header("host"), Some("upstream.test"));
    Ok(())
}

#[tokio::test]
async fn redirects_stay_on_the_proxy() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let proxy = Server::start(|request| match request.target.as_str() {
        "http://first.test/" => Reply::redirect(302, "http://second.test/landing"),
        target => Reply::ok(target),
    })
    .await;
    let options = ConnectionOptions::new().with_proxy(Proxy::new("127.0.0.1", proxy.port()));
    let connection = Context::new().connection("http://first.test/", options)?;

    let response = connection
        .get(RequestOptions::new().redirects(1).keepalive(true))
        .finish()
        .await?;
    assert_eq!(response.text(), "http://second.test/landing");
    assert_eq!(response.redirects(), 1);

    let hosts: Vec<_> = proxy
        .requests()
        .iter()
        .map(|request| request.header("host").unwrap_or_default().to_owned())
        .collect();
    assert_eq!(hosts, ["first.test", "second.test"]);
    Ok(())
}
