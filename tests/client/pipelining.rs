//! Keepalive pipelining and completion order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use zhttp::{ConnectionOptions, Context, Error, MultiRequest, RequestOptions};

#[path = "../support/mod.rs"]
mod support;

use support::{BoxError, Reply, Server};

/// Answers `/<n>` with `n`, the first request slowly so that the rest queue
/// up behind it.
fn numbered(request: &support::Request) -> Reply {
    let name = request.path().trim_start_matches('/').to_owned();
    let reply = Reply::ok(&name);
    if name == "0" {
        reply.delay(Duration::from_millis(100))
    } else {
        reply
    }
}

#[tokio::test]
async fn callbacks_run_in_send_order() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(numbered).await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;

    let order = Arc::new(Mutex::new(Vec::new()));
    let multi: MultiRequest<u32> = MultiRequest::new();
    for n in 0..4 {
        let client = connection.get(RequestOptions::new().path(format!("/{n}")).keepalive(true));
        let order = order.clone();
        client.callback(move |response| order.lock().push(response.text().into_owned()));
        multi.add_client(n, &client)?;
    }

    let responses = multi.wait().await;
    assert_eq!(responses.callback.len(), 4);
    assert!(responses.errback.is_empty());
    assert_eq!(*order.lock(), vec!["0", "1", "2", "3"]);
    for n in 0..4 {
        assert_eq!(responses.callback[&n].text(), n.to_string());
    }

    assert_eq!(server.connections(), 1);
    Ok(())
}

#[tokio::test]
async fn non_keepalive_requests_are_not_pipelined() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(numbered).await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;

    let order = Arc::new(Mutex::new(Vec::new()));
    let multi: MultiRequest<u32> = MultiRequest::new();
    for n in 0..3 {
        let client = connection.get(RequestOptions::new().path(format!("/{n}")));
        let order = order.clone();
        client.callback(move |response| order.lock().push(response.text().into_owned()));
        multi.add_client(n, &client)?;
    }

    let responses = multi.wait().await;
    assert_eq!(responses.callback.len(), 3);
    assert_eq!(*order.lock(), vec!["0", "1", "2"]);

    // Each request closes its socket, so every request gets its own.
    assert_eq!(server.connections(), 3);
    Ok(())
}

#[tokio::test]
async fn closing_server_replays_pipelined_requests() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    // Every answer ends the connection, whatever the request asked for.
    let server = Server::start(|request| {
        let name = request.path().trim_start_matches('/').to_owned();
        Reply::new(200, "OK", &[("Connection", "close")], name)
            .delay(Duration::from_millis(20))
            .close()
    })
    .await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;

    let multi: MultiRequest<u32> = MultiRequest::new();
    for n in 0..3 {
        let client = connection.get(RequestOptions::new().path(format!("/{n}")).keepalive(true));
        multi.add_client(n, &client)?;
    }

    let responses = multi.wait().await;
    assert!(responses.errback.is_empty(), "{:?}", responses.errback);
    for n in 0..3 {
        assert_eq!(responses.callback[&n].text(), n.to_string());
    }
    assert_eq!(server.connections(), 3);
    Ok(())
}

#[tokio::test]
async fn closing_server_fails_pipelined_posts() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(|request| {
        let name = request.path().trim_start_matches('/').to_owned();
        Reply::new(200, "OK", &[("Connection", "close")], name)
            .delay(Duration::from_millis(100))
            .close()
    })
    .await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;

    let multi: MultiRequest<u32> = MultiRequest::new();
    for n in 0..3 {
        let options = RequestOptions::new().path(format!("/{n}")).keepalive(true);
        let client = if n == 1 {
            connection.post(options.body("payload"))
        } else {
            connection.get(options)
        };
        multi.add_client(n, &client)?;
    }

    let responses = multi.wait().await;
    assert_eq!(responses.callback.len(), 2, "{:?}", responses.errback);
    assert_eq!(responses.callback[&0].text(), "0");
    assert_eq!(responses.callback[&2].text(), "2");
    assert!(matches!(responses.errback[&1], Error::ConnectionClosed), "{:?}", responses.errback);

    // The POST was never sent a second time.
    let posts = server.requests().iter().filter(|request| request.method == "POST").count();
    assert_eq!(posts, 0);
    Ok(())
}

#[tokio::test]
async fn close_fails_every_queued_request() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::start(|_| Reply::ok("slow").delay(Duration::from_secs(2))).await;
    let connection = Context::new().connection(&server.url("/"), ConnectionOptions::default())?;

    let multi: MultiRequest<u32> = MultiRequest::new();
    for n in 0..3 {
        let client = connection.get(RequestOptions::new().keepalive(true));
        multi.add_client(n, &client)?;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    connection.close("shutting down");

    let responses = multi.wait().await;
    assert!(responses.callback.is_empty());
    assert_eq!(responses.errback.len(), 3);
    for error in responses.errback.values() {
        assert!(matches!(error, Error::Closed(reason) if reason == "shutting down"), "{error:?}");
    }
    Ok(())
}
