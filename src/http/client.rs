use crate::cli::app_config::Cli;
use crate::http::io::{FirstByteSlot, TracedIo};
use crate::http::pool::{Pool, PoolKey, PooledConn};
use crate::http::resolver::resolve;
use crate::tls::config::build_tls_config;
use crate::trace::hooks::{ClientTrace, GotConnInfo};
use crate::trace::request::Exchange;
use anyhow::Context;
use bytes::Bytes;
use http::header::{HeaderValue, HOST};
use http::{Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Upper bound on resolving, connecting and receiving the response head.
    pub timeout: Duration,
    /// Upper bound on each TCP connect attempt.
    pub connect_timeout: Duration,
    pub insecure: bool,
    pub ca_file: Option<PathBuf>,
    pub max_idle_per_host: usize,
    pub verbosity: u8,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            insecure: false,
            ca_file: None,
            max_idle_per_host: 8,
            verbosity: 0,
        }
    }
}

impl From<&Cli> for ClientOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            timeout: cli.max_time,
            connect_timeout: cli.connect_timeout,
            insecure: cli.skip_certificate_validate,
            ca_file: cli.certificate_path_option.clone(),
            verbosity: cli.verbosity,
            ..Self::default()
        }
    }
}

/// HTTP/1.1 client that reports every lifecycle milestone to the
/// [`ClientTrace`] attached to each request.
///
/// Connections are kept in a small idle pool, so a later request to the same
/// origin may skip resolution and connect entirely.
pub struct TracingClient {
    options: ClientOptions,
    tls: Arc<ClientConfig>,
    pool: Pool,
}

impl TracingClient {
    pub fn new(options: ClientOptions) -> Result<Self, anyhow::Error> {
        let tls = build_tls_config(
            options.ca_file.as_deref(),
            options.insecure,
            options.verbosity,
        )?;
        let pool = Pool::new(options.max_idle_per_host);
        Ok(Self { options, tls, pool })
    }

    async fn send(
        &self,
        mut request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, anyhow::Error> {
        let trace = ClientTrace::from_request(&request)
            .cloned()
            .unwrap_or_default();
        let key = PoolKey::from_uri(request.uri())?;
        into_origin_form(&mut request)?;

        let mut conn = match self.pool.checkout(&key) {
            Some(conn) => {
                trace!("Reusing idle connection to {}:{}", key.host, key.port);
                trace.got_conn(&GotConnInfo {
                    remote_addr: conn.remote_addr,
                    reused: true,
                });
                conn
            }
            None => {
                let conn = self.connect(&key, &trace).await?;
                trace.got_conn(&GotConnInfo {
                    remote_addr: conn.remote_addr,
                    reused: false,
                });
                conn
            }
        };

        conn.slot.arm(trace);
        match conn.sender.send_request(request).await {
            Ok(response) => {
                self.pool.checkin(key, conn);
                Ok(response)
            }
            Err(e) => {
                conn.slot.disarm();
                Err(anyhow::Error::from(e).context("Failed to execute request"))
            }
        }
    }

    async fn connect(
        &self,
        key: &PoolKey,
        trace: &ClientTrace,
    ) -> Result<PooledConn, anyhow::Error> {
        let addrs = resolve(&key.host, key.port, trace).await?;

        let mut last_err = None;
        for addr in addrs {
            trace.connect_start(addr);
            match timeout(self.options.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    return self.handshake(key, stream, addr).await;
                }
                Ok(Err(e)) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(
                        anyhow::Error::from(e).context(format!("Failed to connect to {addr}")),
                    );
                }
                Err(_) => {
                    debug!("Connect to {} timed out", addr);
                    last_err = Some(anyhow!(
                        "Connect to {} timed out after {:?}",
                        addr,
                        self.options.connect_timeout
                    ));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("No address to connect to for {}", key.host)))
    }

    async fn handshake(
        &self,
        key: &PoolKey,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> Result<PooledConn, anyhow::Error> {
        let local_addr = stream.local_addr()?;
        if !key.https {
            return start_conn(stream, local_addr, remote_addr).await;
        }

        let host = key.host.trim_start_matches('[').trim_end_matches(']');
        let domain = pki_types::ServerName::try_from(host)
            .map_err(|e| anyhow!("{}", e))?
            .to_owned();
        let tls_stream = TlsConnector::from(self.tls.clone())
            .connect(domain, stream)
            .instrument(info_span!("Tls Handshake"))
            .await
            .with_context(|| format!("TLS handshake with {} failed", key.host))?;
        let (_, session) = tls_stream.get_ref();
        debug!(
            "* TLS connected: {:?} / {:?}",
            session.protocol_version(),
            session.negotiated_cipher_suite().map(|suite| suite.suite())
        );
        start_conn(tls_stream, local_addr, remote_addr).await
    }
}

impl Exchange<Full<Bytes>> for TracingClient {
    type Body = Incoming;
    type Error = anyhow::Error;

    async fn exchange(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, anyhow::Error> {
        timeout(self.options.timeout, self.send(request))
            .await
            .map_err(|_| {
                anyhow!(
                    "Request timed out after {} seconds",
                    self.options.timeout.as_secs_f64()
                )
            })?
    }
}

async fn start_conn<S>(
    stream: S,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
) -> Result<PooledConn, anyhow::Error>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let slot = FirstByteSlot::default();
    let io = TokioIo::new(TracedIo::new(stream, slot.clone()));
    let (sender, conn) = http1::handshake(io)
        .instrument(info_span!("Http Handshake"))
        .await?;
    tokio::task::spawn(
        async move {
            if let Err(err) = conn.await {
                debug!("Connection closed with error: {:?}", err);
            }
        }
        .instrument(info_span!(
            "conn",
            localAddr = %local_addr,
            remoteAddr = %remote_addr,
        )),
    );
    Ok(PooledConn {
        sender,
        slot,
        remote_addr: Some(remote_addr),
    })
}

/// HTTP/1.1 connections expect `origin-form` targets and an explicit `Host`.
fn into_origin_form<B>(request: &mut Request<B>) -> Result<(), anyhow::Error> {
    let uri = request.uri().clone();
    if !request.headers().contains_key(HOST) {
        let authority = uri
            .authority()
            .ok_or_else(|| anyhow!("Can not find host in the uri:{}.", uri))?;
        request
            .headers_mut()
            .insert(HOST, HeaderValue::from_str(authority.as_str())?);
    }
    let origin = uri.path_and_query().map_or("/", |p| p.as_str());
    *request.uri_mut() = origin.parse::<Uri>()?;
    Ok(())
}
