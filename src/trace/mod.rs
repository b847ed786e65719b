//! Per-attempt latency tracing for outgoing HTTP requests.
//!
//! [`do_request_with_trace`] attaches a fresh [`Trace`] to a request, lets an
//! [`Exchange`] fire the lifecycle hooks while it works, and wraps the
//! response body so the end of the transfer is stamped too. Once the body is
//! drained, [`Trace::result`] turns the milestones into a [`TraceResult`].

pub mod body;
pub mod hooks;
pub mod ledger;
pub mod request;
pub mod result;

pub use body::TracedBody;
pub use hooks::{ClientTrace, RecordingHooks, TraceHooks};
pub use ledger::Trace;
pub use request::{do_request_with_trace, Exchange};
pub use result::TraceResult;
