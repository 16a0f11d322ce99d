//! Cancellation watcher
//!
//! [`Watched`] ties a stream to the process-wide [`CancellationToken`]. Once
//! the token fires, the inner stream is dropped (closing the socket) and every
//! pending or later read/write fails with [`Cancelled::io_error`].
//!
//! The watch is a waker registration on the token, not a separate task, so
//! watching costs nothing once the owner drops the stream.

use crate::error::Cancelled;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// A stream that is force-closed when its token is cancelled
pub struct Watched<S> {
    inner: Option<S>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

/// Register `stream` with `token`
pub fn watch<S>(stream: S, token: &CancellationToken) -> Watched<S> {
    Watched {
        inner: Some(stream),
        cancelled: Box::pin(token.clone().cancelled_owned()),
    }
}

impl<S> Watched<S> {
    /// Close the stream now. Calling it again does nothing.
    pub fn close(&mut self) {
        self.inner = None;
    }

    /// Whether the stream has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Get a reference to the stream while it is still open
    pub fn get_ref(&self) -> Option<&S> {
        self.inner.as_ref()
    }

    /// Close the inner stream if the token has fired, then hand it out.
    fn poll_live(&mut self, cx: &mut Context<'_>) -> io::Result<&mut S> {
        if self.inner.is_some() && self.cancelled.as_mut().poll(cx).is_ready() {
            self.close();
        }
        self.inner.as_mut().ok_or_else(Cancelled::io_error)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Watched<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().poll_live(cx) {
            Ok(inner) => Pin::new(inner).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Watched<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().poll_live(cx) {
            Ok(inner) => Pin::new(inner).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().poll_live(cx) {
            Ok(inner) => Pin::new(inner).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().poll_live(cx) {
            Ok(inner) => Pin::new(inner).poll_shutdown(cx),
            // Already closed counts as shut down.
            Err(_) => Poll::Ready(Ok(())),
        }
    }
}
