use bytes::Bytes;
use chrono::TimeDelta;
use clap::Parser;
use http::header::LOCATION;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use rtrace::cli::app_config::Cli;
use rtrace::http::client::{ClientOptions, TracingClient};
use rtrace::http::handler::request_with_redirects;
use rtrace::trace::{do_request_with_trace, Trace};
use rustls::ServerConfig;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

type Reply = Result<Response<Full<Bytes>>, Infallible>;

async fn slow_hello(_: Request<Incoming>) -> Reply {
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(Response::new(Full::new(Bytes::from_static(b"hello world"))))
}

async fn stalled(_: Request<Incoming>) -> Reply {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(Response::new(Full::new(Bytes::new())))
}

/// `/start` redirects to `/final`, `/loop` redirects to itself.
async fn redirecting(req: Request<Incoming>) -> Reply {
    let location = match req.uri().path() {
        "/start" => "/final",
        "/loop" => "/loop",
        _ => return slow_hello(req).await,
    };
    let mut res = Response::new(Full::new(Bytes::from_static(b"moved")));
    *res.status_mut() = StatusCode::FOUND;
    res.headers_mut()
        .insert(LOCATION, location.parse().unwrap());
    Ok(res)
}

async fn serve<S, F, Fut>(stream: S, handler: F)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: Fn(Request<Incoming>) -> Fut + Copy + Send + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    let _ = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service_fn(handler))
        .await;
}

async fn spawn_server_with<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Copy + Send + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve(stream, handler));
        }
    });
    addr
}

async fn spawn_server() -> SocketAddr {
    spawn_server_with(slow_hello).await
}

/// HTTPS server with a self-signed certificate for `localhost`.
async fn spawn_tls_server() -> SocketAddr {
    let certs = rustls_pemfile::certs(&mut &include_bytes!("fixtures/localhost.pem")[..])
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut &include_bytes!("fixtures/localhost-key.pem")[..])
        .unwrap()
        .unwrap();
    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(stream).await {
                    serve(tls, slow_hello).await;
                }
            });
        }
    });
    addr
}

fn get(url: &str) -> Request<Full<Bytes>> {
    Request::get(url).body(Full::new(Bytes::new())).unwrap()
}

fn client() -> TracingClient {
    TracingClient::new(ClientOptions::default()).unwrap()
}

async fn traced_get(client: &TracingClient, url: &str) -> Arc<Trace> {
    let (trace, outcome) = do_request_with_trace(client, get(url)).await;
    let body = outcome.unwrap().into_body().collect().await.unwrap();
    assert_eq!(body.to_bytes(), "hello world");
    trace
}

fn assert_ordered(trace: &Trace) {
    let start = trace.request_start().unwrap_or(trace.created());
    let got_conn = trace.got_conn().unwrap();
    let first_byte = trace.first_byte().unwrap();
    let body_done = trace.body_read_done().unwrap();
    assert!(start <= got_conn);
    assert!(got_conn <= first_byte);
    assert!(first_byte <= body_done);
}

#[tokio::test]
async fn literal_address_skips_dns_and_adds_up() {
    let addr = spawn_server().await;
    let client = client();

    let trace = traced_get(&client, &format!("http://{addr}/")).await;

    assert!(trace.dns_start().is_none());
    assert!(trace.request_start().is_some());
    assert_ordered(&trace);

    let result = trace.result();
    assert_eq!(result.target, format!("http://{addr}/"));
    assert_eq!(result.dns_lookup, TimeDelta::zero());
    assert!(result.server_processing >= TimeDelta::milliseconds(20));
    assert_eq!(
        result.total,
        result.tcp_connection + result.server_processing + result.content_transfer
    );
}

#[tokio::test]
async fn hostname_fires_dns_hooks() {
    let addr = spawn_server().await;
    let client = client();

    let trace = traced_get(&client, &format!("http://localhost:{}/", addr.port())).await;

    let dns_start = trace.dns_start().unwrap();
    let dns_done = trace.dns_done().unwrap();
    assert_eq!(trace.request_start(), Some(dns_start));
    assert!(dns_done <= trace.got_conn().unwrap());
    assert_ordered(&trace);
    assert!(trace.result().dns_lookup >= TimeDelta::zero());
}

#[tokio::test]
async fn second_attempt_reuses_pooled_connection() {
    let addr = spawn_server().await;
    let client = client();
    let url = format!("http://{addr}/");

    let first = traced_get(&client, &url).await;
    assert!(first.request_start().is_some());
    // let the connection task notice the finished body and go idle
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = traced_get(&client, &url).await;
    assert!(second.request_start().is_none());
    assert!(second.dns_start().is_none());
    assert_ordered(&second);
    assert!(second.result().server_processing >= TimeDelta::milliseconds(20));
}

#[tokio::test]
async fn concurrent_attempts_keep_separate_ledgers() {
    let addr = spawn_server().await;
    let client = client();
    let url = format!("http://{addr}/");

    let (a, b) = tokio::join!(traced_get(&client, &url), traced_get(&client, &url));

    assert!(!Arc::ptr_eq(&a, &b));
    assert_ordered(&a);
    assert_ordered(&b);
    assert!(a.request_start().is_some());
    assert!(b.request_start().is_some());
}

#[tokio::test]
async fn refused_connection_returns_error_and_partial_trace() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (trace, outcome) = do_request_with_trace(&client(), get(&format!("http://{addr}/"))).await;

    let err = outcome.unwrap_err();
    assert!(format!("{err:#}").contains("Failed to connect"));
    assert!(trace.request_start().is_some());
    assert!(trace.got_conn().is_none());
    assert!(trace.first_byte().is_none());

    let result = trace.result();
    assert_eq!(result.tcp_connection, TimeDelta::zero());
    assert_eq!(result.total, TimeDelta::zero());
}

#[tokio::test]
async fn abandoned_body_leaves_transfer_unmeasured() {
    let addr = spawn_server().await;
    let (trace, outcome) = do_request_with_trace(&client(), get(&format!("http://{addr}/"))).await;
    drop(outcome.unwrap());

    assert!(trace.first_byte().is_some());
    assert!(trace.body_read_done().is_none());
    assert_eq!(trace.result().content_transfer, TimeDelta::zero());
}

#[tokio::test]
async fn timed_out_attempt_keeps_milestones_already_recorded() {
    let addr = spawn_server_with(stalled).await;
    let client = TracingClient::new(ClientOptions {
        timeout: Duration::from_millis(200),
        ..ClientOptions::default()
    })
    .unwrap();

    let (trace, outcome) = do_request_with_trace(&client, get(&format!("http://{addr}/"))).await;

    let err = outcome.unwrap_err();
    assert!(format!("{err:#}").contains("timed out"));
    assert!(trace.request_start().is_some());
    assert!(trace.got_conn().is_some());
    assert!(trace.first_byte().is_none());
    assert!(trace.body_read_done().is_none());

    let result = trace.result();
    assert!(result.tcp_connection >= TimeDelta::zero());
    assert_eq!(result.server_processing, TimeDelta::zero());
    assert_eq!(result.total, TimeDelta::zero());
}

#[tokio::test]
async fn each_redirect_hop_gets_its_own_ledger() {
    let addr = spawn_server_with(redirecting).await;
    let url = format!("http://{addr}/start");
    let cli = Cli::try_parse_from(["rtrace", "-L", url.as_str()]).unwrap();

    let hops = request_with_redirects(&cli, &client()).await.unwrap();

    assert_eq!(hops.len(), 2);
    let (first, second) = (&hops[0], &hops[1]);
    assert!(!Arc::ptr_eq(first, second));
    assert_eq!(first.target(), format!("http://{addr}/start"));
    assert_eq!(second.target(), format!("http://{addr}/final"));
    assert_ordered(first);
    assert_ordered(second);
    assert!(first.body_read_done().unwrap() <= second.created());
    assert!(second.result().server_processing >= TimeDelta::milliseconds(20));
}

#[tokio::test]
async fn redirects_are_not_followed_without_location_flag() {
    let addr = spawn_server_with(redirecting).await;
    let url = format!("http://{addr}/start");
    let cli = Cli::try_parse_from(["rtrace", url.as_str()]).unwrap();

    let hops = request_with_redirects(&cli, &client()).await.unwrap();

    assert_eq!(hops.len(), 1);
    assert_ordered(&hops[0]);
}

#[tokio::test]
async fn redirect_loop_gives_up() {
    let addr = spawn_server_with(redirecting).await;
    let url = format!("http://{addr}/loop");
    let cli = Cli::try_parse_from(["rtrace", "-L", url.as_str()]).unwrap();

    let err = request_with_redirects(&cli, &client()).await.unwrap_err();
    assert!(err.to_string().contains("Exceeded maximum number of redirects"));
}

#[tokio::test]
async fn insecure_https_traces_above_tls() {
    let addr = spawn_tls_server().await;
    let client = TracingClient::new(ClientOptions {
        insecure: true,
        ..ClientOptions::default()
    })
    .unwrap();

    let trace = traced_get(&client, &format!("https://localhost:{}/", addr.port())).await;

    assert!(trace.dns_start().is_some());
    assert_ordered(&trace);
    // the handshake reads land before got_conn, not in the first-byte stamp
    assert!(trace.result().server_processing >= TimeDelta::milliseconds(20));
}

#[tokio::test]
async fn untrusted_certificate_fails_before_got_conn() {
    let addr = spawn_tls_server().await;

    let (trace, outcome) = do_request_with_trace(
        &client(),
        get(&format!("https://localhost:{}/", addr.port())),
    )
    .await;

    let err = outcome.unwrap_err();
    assert!(format!("{err:#}").contains("TLS handshake with localhost failed"));
    assert!(trace.request_start().is_some());
    assert!(trace.got_conn().is_none());
    assert_eq!(trace.result().total, TimeDelta::zero());
}
