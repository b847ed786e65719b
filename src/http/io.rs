use crate::trace::hooks::ClientTrace;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Hook set of the attempt currently waiting for its first response byte on
/// a connection.
///
/// A pooled connection serves many attempts in turn, so the slot is re-armed
/// before each dispatch and emptied by the first read that returns data.
#[derive(Clone, Default)]
pub struct FirstByteSlot(Arc<Mutex<Option<ClientTrace>>>);

impl FirstByteSlot {
    pub fn arm(&self, trace: ClientTrace) {
        *self.lock() = Some(trace);
    }

    pub fn disarm(&self) {
        self.lock().take();
    }

    fn fire(&self) {
        let armed = self.lock().take();
        if let Some(trace) = armed {
            trace.got_first_response_byte();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ClientTrace>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pin_project! {
    /// Connection stream that reports the first bytes read after a dispatch.
    ///
    /// Wraps the plaintext side of the connection (above TLS), so handshake
    /// records never count as response bytes.
    pub struct TracedIo<S> {
        #[pin]
        inner: S,
        slot: FirstByteSlot,
    }
}

impl<S> TracedIo<S> {
    pub fn new(inner: S, slot: FirstByteSlot) -> Self {
        Self { inner, slot }
    }
}

impl<S: AsyncRead> AsyncRead for TracedIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let polled = this.inner.poll_read(cx, buf);
        if matches!(polled, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.slot.fire();
        }
        polled
    }
}

impl<S: AsyncWrite> AsyncWrite for TracedIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
