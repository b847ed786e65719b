use crate::trace::ledger::Trace;
use http::Request;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct DnsStartInfo<'a> {
    pub host: &'a str,
}

pub struct DnsDoneInfo<'a> {
    pub addrs: &'a [SocketAddr],
    pub err: Option<&'a io::Error>,
}

pub struct GotConnInfo {
    pub remote_addr: Option<SocketAddr>,
    /// The connection came out of the idle pool rather than a fresh dial.
    pub reused: bool,
}

/// Callbacks an exchange mechanism invokes as an attempt reaches each
/// milestone.
///
/// Hooks may run on any runtime thread, including the task that drives the
/// connection, so implementations must be `Send + Sync`. They must stay cheap:
/// they run inline on the I/O path.
pub trait TraceHooks: Send + Sync {
    fn dns_start(&self, _info: &DnsStartInfo<'_>) {}

    fn dns_done(&self, _info: &DnsDoneInfo<'_>) {}

    fn connect_start(&self, _addr: SocketAddr) {}

    fn got_conn(&self, _info: &GotConnInfo) {}

    fn got_first_response_byte(&self) {}
}

struct NoopHooks;

impl TraceHooks for NoopHooks {}

/// Request-scoped handle to a hook set.
///
/// The handle travels in the request's extensions, which is how an
/// [`Exchange`](crate::trace::request::Exchange) finds the hooks for the
/// attempt it is serving.
#[derive(Clone)]
pub struct ClientTrace(Arc<dyn TraceHooks>);

impl ClientTrace {
    pub fn new(hooks: impl TraceHooks + 'static) -> Self {
        Self(Arc::new(hooks))
    }

    pub fn attach<B>(self, request: &mut Request<B>) {
        request.extensions_mut().insert(self);
    }

    pub fn from_request<B>(request: &Request<B>) -> Option<&ClientTrace> {
        request.extensions().get::<ClientTrace>()
    }

    pub fn dns_start(&self, info: &DnsStartInfo<'_>) {
        self.0.dns_start(info)
    }

    pub fn dns_done(&self, info: &DnsDoneInfo<'_>) {
        self.0.dns_done(info)
    }

    pub fn connect_start(&self, addr: SocketAddr) {
        self.0.connect_start(addr)
    }

    pub fn got_conn(&self, info: &GotConnInfo) {
        self.0.got_conn(info)
    }

    pub fn got_first_response_byte(&self) {
        self.0.got_first_response_byte()
    }
}

impl Default for ClientTrace {
    fn default() -> Self {
        Self::new(NoopHooks)
    }
}

impl fmt::Debug for ClientTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTrace").finish_non_exhaustive()
    }
}

/// Hook set that stamps every milestone into one [`Trace`].
pub struct RecordingHooks {
    trace: Arc<Trace>,
}

impl RecordingHooks {
    pub fn new(trace: Arc<Trace>) -> Self {
        Self { trace }
    }
}

impl TraceHooks for RecordingHooks {
    fn dns_start(&self, info: &DnsStartInfo<'_>) {
        self.trace.mark_dns_start();
        debug!("dns start: {}", info.host);
    }

    fn dns_done(&self, info: &DnsDoneInfo<'_>) {
        self.trace.mark_dns_done();
        match info.err {
            Some(err) => debug!("dns done with error: {err}"),
            None => debug!("dns done: {:?}", info.addrs),
        }
    }

    fn connect_start(&self, addr: SocketAddr) {
        self.trace.mark_connect_start();
        debug!("connect start: {addr}");
    }

    fn got_conn(&self, info: &GotConnInfo) {
        self.trace.mark_got_conn();
        debug!(
            "got conn: remote={:?} reused={}",
            info.remote_addr, info.reused
        );
    }

    fn got_first_response_byte(&self) {
        self.trace.mark_first_response_byte();
        trace!("got first response byte");
    }
}
