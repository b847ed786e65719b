use crate::trace::body::TracedBody;
use crate::trace::hooks::{ClientTrace, RecordingHooks};
use crate::trace::ledger::Trace;
use http::{Request, Response};
use std::future::Future;
use std::sync::Arc;

/// Something that can carry one request to a server and bring the response
/// head back.
///
/// Implementations look up the [`ClientTrace`] attached to the request and
/// fire its hooks as the attempt progresses. Timeouts, pooling and error
/// types are theirs to define.
pub trait Exchange<B> {
    type Body: http_body::Body;
    type Error;

    fn exchange(
        &self,
        request: Request<B>,
    ) -> impl Future<Output = Result<Response<Self::Body>, Self::Error>> + Send;
}

/// Sends `request` through `client` with milestone tracing attached.
///
/// A fresh [`Trace`] is created for the attempt and returned whatever the
/// outcome. When a response arrives its body is wrapped so that draining it
/// stamps the end of the transfer; derive the breakdown with
/// [`Trace::result`] only after that. On failure the exchange's error is
/// returned untouched and the trace holds whichever milestones fired first.
pub async fn do_request_with_trace<E, B>(
    client: &E,
    mut request: Request<B>,
) -> (
    Arc<Trace>,
    Result<Response<TracedBody<E::Body>>, E::Error>,
)
where
    E: Exchange<B>,
{
    let trace = Arc::new(Trace::new(request.uri().to_string()));
    ClientTrace::new(RecordingHooks::new(trace.clone())).attach(&mut request);

    let outcome = client.exchange(request).await;
    let outcome = outcome.map(|response| {
        let trace = trace.clone();
        response.map(|body| TracedBody::new(body, trace))
    });
    (trace, outcome)
}
