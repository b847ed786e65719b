use crate::http::io::FirstByteSlot;
use bytes::Bytes;
use http::uri::Scheme;
use http::Uri;
use http_body_util::Full;
use hyper::client::conn::http1::SendRequest;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub https: bool,
    pub host: String,
    pub port: u16,
}

impl PoolKey {
    pub fn from_uri(uri: &Uri) -> Result<Self, anyhow::Error> {
        let https = match uri.scheme() {
            Some(scheme) if *scheme == Scheme::HTTPS => true,
            Some(scheme) if *scheme == Scheme::HTTP => false,
            Some(scheme) => return Err(anyhow!("Unsupported scheme {scheme} in {uri}")),
            None => return Err(anyhow!("Can not find scheme in the uri:{}.", uri)),
        };
        let host = uri
            .host()
            .ok_or_else(|| anyhow!("Can not find host in the uri:{}.", uri))?
            .to_string();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        Ok(Self { https, host, port })
    }
}

/// An HTTP/1.1 connection handle together with its first-byte slot.
pub struct PooledConn {
    pub sender: SendRequest<Full<Bytes>>,
    pub slot: FirstByteSlot,
    pub remote_addr: Option<SocketAddr>,
}

/// Idle HTTP/1.1 connections, keyed by scheme, host and port.
pub struct Pool {
    idle: Mutex<HashMap<PoolKey, Vec<PooledConn>>>,
    max_idle_per_host: usize,
}

impl Pool {
    pub fn new(max_idle_per_host: usize) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            max_idle_per_host,
        }
    }

    /// Takes a connection that can accept a request right now.
    ///
    /// Closed connections are dropped along the way. Connections still busy
    /// with a previous response body stay in the pool.
    pub fn checkout(&self, key: &PoolKey) -> Option<PooledConn> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let conns = idle.get_mut(key)?;
        conns.retain(|conn| !conn.sender.is_closed());
        let ready = conns.iter().position(|conn| conn.sender.is_ready());
        let conn = ready.map(|i| conns.swap_remove(i));
        if conns.is_empty() {
            idle.remove(key);
        }
        conn
    }

    /// Returns a connection for later reuse.
    ///
    /// Connections that closed while idle are swept from every key here, so
    /// an origin that is never requested again does not keep dead senders.
    pub fn checkin(&self, key: PoolKey, conn: PooledConn) {
        if self.max_idle_per_host == 0 || conn.sender.is_closed() {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.retain(|_, conns| {
            conns.retain(|conn| !conn.sender.is_closed());
            !conns.is_empty()
        });
        let conns = idle.entry(key).or_default();
        if conns.len() < self.max_idle_per_host {
            conns.push(conn);
        } else {
            trace!("Idle pool full, dropping connection");
        }
    }
}
