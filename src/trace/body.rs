use crate::trace::ledger::Trace;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pin_project! {
    /// Response body that stamps `body_read_done` on its first terminal poll.
    ///
    /// Frames, errors and size hints pass through unchanged. End of data, a
    /// read error, and a data frame after which the inner body reports
    /// `is_end_stream` all count as terminal; whichever comes first is the
    /// only one recorded.
    #[derive(Debug)]
    pub struct TracedBody<B> {
        #[pin]
        inner: B,
        trace: Arc<Trace>,
    }
}

impl<B> TracedBody<B> {
    pub fn new(inner: B, trace: Arc<Trace>) -> Self {
        Self { inner, trace }
    }
}

impl<B: Body> Body for TracedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let polled = this.inner.as_mut().poll_frame(cx);
        let terminal = match &polled {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => true,
            // consumers may stop polling once the inner body says it is done
            Poll::Ready(Some(Ok(_))) => this.inner.is_end_stream(),
            Poll::Pending => false,
        };
        if terminal {
            this.trace.mark_body_read_done();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
