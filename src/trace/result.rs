use chrono::TimeDelta;
use serde::{Serialize, Serializer};
use std::fmt;

/// Latency breakdown of one attempt, derived by [`Trace::result`].
///
/// Intervals are signed. A zero interval means one of its milestones never
/// fired (DNS skipped, body abandoned, exchange failed early); a negative one
/// means the milestones raced. Neither is reported as an error.
///
/// [`Trace::result`]: crate::trace::ledger::Trace::result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceResult {
    pub target: String,
    #[serde(rename = "dns_lookup_ms", serialize_with = "as_millis")]
    pub dns_lookup: TimeDelta,
    #[serde(rename = "tcp_connection_ms", serialize_with = "as_millis")]
    pub tcp_connection: TimeDelta,
    #[serde(rename = "server_processing_ms", serialize_with = "as_millis")]
    pub server_processing: TimeDelta,
    #[serde(rename = "content_transfer_ms", serialize_with = "as_millis")]
    pub content_transfer: TimeDelta,
    #[serde(rename = "total_ms", serialize_with = "as_millis")]
    pub total: TimeDelta,
}

impl fmt::Display for TraceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [DNS: {} TCP: {} Server: {} Transfer: {} Total: {}]",
            self.target,
            format_interval(self.dns_lookup),
            format_interval(self.tcp_connection),
            format_interval(self.server_processing),
            format_interval(self.content_transfer),
            format_interval(self.total),
        )
    }
}

fn as_millis<S: Serializer>(interval: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(millis(*interval))
}

fn millis(interval: TimeDelta) -> f64 {
    match interval.num_microseconds() {
        Some(micros) => micros as f64 / 1000.0,
        None => interval.num_milliseconds() as f64,
    }
}

/// Renders an interval the way humans read latencies: `0s`, `400ns`,
/// `850.5µs`, `20ms`, `1.234ms`, `1.234567s`.
pub fn format_interval(interval: TimeDelta) -> String {
    if interval < TimeDelta::zero() {
        return format!("-{}", format_interval(-interval));
    }
    let Some(nanos) = interval.num_nanoseconds() else {
        return format!("{}s", interval.num_seconds());
    };
    match nanos {
        0 => String::from("0s"),
        1..=999 => format!("{nanos}ns"),
        1_000..=999_999 => format!("{}µs", trim_fraction(nanos as f64 / 1e3, 3)),
        1_000_000..=999_999_999 => format!("{}ms", trim_fraction(nanos as f64 / 1e6, 3)),
        _ => format!("{}s", trim_fraction(nanos as f64 / 1e9, 6)),
    }
}

fn trim_fraction(value: f64, digits: usize) -> String {
    let fixed = format!("{value:.digits$}");
    fixed
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
