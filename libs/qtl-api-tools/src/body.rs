use bytes::Bytes;
use http::Response;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

/// Shared tally of bytes read off the wire for one response.
///
/// Stored in the response extensions so it stays reachable after the body
/// has been wrapped by the decompression layer.
#[derive(Debug, Clone, Default)]
pub struct RawByteCounter(Arc<AtomicUsize>);

impl RawByteCounter {
    fn add(&self, n: usize) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

pin_project! {
    /// Body wrapper that counts data bytes as they stream through.
    ///
    /// Sits directly on top of the connection body, beneath any decoder, so
    /// the count is the encoded size.
    pub struct RawCountingBody<B> {
        #[pin]
        inner: B,
        counter: RawByteCounter,
    }
}

impl<B> RawCountingBody<B> {
    pub fn new(inner: B, counter: RawByteCounter) -> Self {
        Self { inner, counter }
    }
}

impl<B> Body for RawCountingBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = this.inner.poll_frame(cx);
        if let Poll::Ready(Some(Ok(frame))) = &polled
            && let Some(data) = frame.data_ref()
        {
            this.counter.add(data.len());
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

/// Wrap a response body in a [`RawCountingBody`] and expose its counter
/// through the response extensions.
pub fn count_raw_bytes<B>(response: Response<B>) -> Response<RawCountingBody<B>> {
    let counter = RawByteCounter::default();
    let (mut parts, body) = response.into_parts();
    parts.extensions.insert(counter.clone());
    Response::from_parts(parts, RawCountingBody::new(body, counter))
}
