//! Response body adapter that delivers streamed data at a bounded interval.
//!
//! Upstream chunks are coalesced and handed to the client no later than the
//! flush interval after the first buffered byte arrived, or as soon as the
//! buffer reaches [`MAX_BUFFERED_BYTES`]. A zero interval passes every chunk
//! through untouched.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use tokio::time::Sleep;

/// Buffered bytes that force a flush regardless of the interval.
pub const MAX_BUFFERED_BYTES: usize = 64 * 1024;

/// Body wrapper that flushes buffered data every `interval`.
pub struct FlushBody<B: Body> {
    inner: B,
    interval: Duration,
    buffer: BytesMut,
    deadline: Option<Pin<Box<Sleep>>>,
    pending: Option<Result<Frame<Bytes>, B::Error>>,
    done: bool,
}

// Only `inner` is ever polled in place, and it is required to be `Unpin`.
impl<B: Body + Unpin> Unpin for FlushBody<B> {}

impl<B> FlushBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    pub fn new(inner: B, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            buffer: BytesMut::new(),
            deadline: None,
            pending: None,
            done: false,
        }
    }

    fn flush(&mut self) -> Frame<Bytes> {
        self.deadline = None;
        Frame::data(self.buffer.split().freeze())
    }
}

impl<B> Body for FlushBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, B::Error>>> {
        let this = self.get_mut();

        if this.interval.is_zero() {
            return Pin::new(&mut this.inner).poll_frame(cx);
        }

        loop {
            if !this.buffer.is_empty() && this.deadline.as_ref().is_some_and(|d| d.is_elapsed()) {
                return Poll::Ready(Some(Ok(this.flush())));
            }
            if this.buffer.is_empty() {
                if let Some(next) = this.pending.take() {
                    return Poll::Ready(Some(next));
                }
                if this.done {
                    return Poll::Ready(None);
                }
            }
            if this.done || this.pending.is_some() {
                return Poll::Ready(Some(Ok(this.flush())));
            }

            match Pin::new(&mut this.inner).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) => {
                        if this.buffer.is_empty() {
                            this.deadline = Some(Box::pin(tokio::time::sleep(this.interval)));
                        }
                        this.buffer.extend_from_slice(&data);
                        if this.buffer.len() >= MAX_BUFFERED_BYTES {
                            return Poll::Ready(Some(Ok(this.flush())));
                        }
                    }
                    // Trailers go out after whatever data is buffered.
                    Err(frame) => this.pending = Some(Ok(frame)),
                },
                Poll::Ready(Some(Err(e))) => this.pending = Some(Err(e)),
                Poll::Ready(None) => this.done = true,
                Poll::Pending => {
                    let Some(deadline) = this.deadline.as_mut() else {
                        return Poll::Pending;
                    };
                    return match deadline.as_mut().poll(cx) {
                        Poll::Ready(()) => Poll::Ready(Some(Ok(this.flush()))),
                        Poll::Pending => Poll::Pending,
                    };
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.buffer.is_empty()
            && self.pending.is_none()
            && (self.done || self.inner.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        if self.buffer.is_empty() && self.pending.is_none() && !self.done {
            self.inner.size_hint()
        } else {
            SizeHint::default()
        }
    }
}
