use crate::trace::result::TraceResult;
use chrono::TimeDelta;
use std::sync::OnceLock;
use std::time::Instant;

/// Milestone timestamps of one request attempt.
///
/// Every milestone is write-once: the first stamp wins and later stamps for
/// the same milestone are ignored. An empty cell means the milestone never
/// fired for this attempt.
///
/// A `Trace` must not outlive its attempt or be handed to a second one (a
/// redirect hop or a retry). Build a fresh one per attempt instead.
#[derive(Debug)]
pub struct Trace {
    target: String,
    created: Instant,
    request_start: OnceLock<Instant>,
    dns_start: OnceLock<Instant>,
    dns_done: OnceLock<Instant>,
    got_conn: OnceLock<Instant>,
    first_byte: OnceLock<Instant>,
    body_read_done: OnceLock<Instant>,
}

impl Trace {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            created: Instant::now(),
            request_start: OnceLock::new(),
            dns_start: OnceLock::new(),
            dns_done: OnceLock::new(),
            got_conn: OnceLock::new(),
            first_byte: OnceLock::new(),
            body_read_done: OnceLock::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn request_start(&self) -> Option<Instant> {
        self.request_start.get().copied()
    }

    pub fn dns_start(&self) -> Option<Instant> {
        self.dns_start.get().copied()
    }

    pub fn dns_done(&self) -> Option<Instant> {
        self.dns_done.get().copied()
    }

    pub fn got_conn(&self) -> Option<Instant> {
        self.got_conn.get().copied()
    }

    pub fn first_byte(&self) -> Option<Instant> {
        self.first_byte.get().copied()
    }

    pub fn body_read_done(&self) -> Option<Instant> {
        self.body_read_done.get().copied()
    }

    pub fn mark_dns_start(&self) {
        let now = Instant::now();
        stamp(&self.request_start, now);
        stamp(&self.dns_start, now);
    }

    pub fn mark_dns_done(&self) {
        stamp(&self.dns_done, Instant::now());
    }

    /// Connecting without a lookup (literal address) still opens the attempt.
    pub fn mark_connect_start(&self) {
        stamp(&self.request_start, Instant::now());
    }

    pub fn mark_got_conn(&self) {
        stamp(&self.got_conn, Instant::now());
    }

    pub fn mark_first_response_byte(&self) {
        stamp(&self.first_byte, Instant::now());
    }

    pub fn mark_body_read_done(&self) {
        stamp(&self.body_read_done, Instant::now());
    }

    /// Derives the latency breakdown from the milestones recorded so far.
    ///
    /// The attempt is measured from `request_start`, or from ledger creation
    /// when the transport never reported any work (e.g. the dispatch failed
    /// straight away). Unlike a raw `Instant` subtraction, an interval with a
    /// missing endpoint is exactly zero rather than a huge or negative value.
    /// One whose endpoints raced out of order is negative. Consumers should
    /// read both as "not applicable".
    pub fn result(&self) -> TraceResult {
        let start = Some(self.request_start().unwrap_or(self.created));
        TraceResult {
            target: self.target.clone(),
            dns_lookup: between(self.dns_start(), self.dns_done()),
            tcp_connection: between(start, self.got_conn()),
            server_processing: between(self.got_conn(), self.first_byte()),
            content_transfer: between(self.first_byte(), self.body_read_done()),
            total: between(start, self.body_read_done()),
        }
    }
}

fn stamp(cell: &OnceLock<Instant>, at: Instant) {
    let _ = cell.set(at);
}

fn between(from: Option<Instant>, to: Option<Instant>) -> TimeDelta {
    let (Some(from), Some(to)) = (from, to) else {
        return TimeDelta::zero();
    };
    if to >= from {
        TimeDelta::from_std(to - from).unwrap_or(TimeDelta::MAX)
    } else {
        -TimeDelta::from_std(from - to).unwrap_or(TimeDelta::MAX)
    }
}
