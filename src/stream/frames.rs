//! Byte-chunk stream to frame-body stream

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, trace};

use crate::framing::FrameDecoder;
use crate::{AgentError, Result};

/// Extension trait to decode multipart frames from any stream of byte chunks
pub trait FramesExt: Stream<Item = Result<Vec<u8>>> {
    /// Yield complete frame bodies, in arrival order, as chunks come in.
    ///
    /// The stream ends after the first error, framing or transport.
    fn frames(self, decoder: FrameDecoder) -> Frames<Self>
    where
        Self: Sized,
    {
        Frames::new(self, decoder)
    }
}

impl<T: Stream<Item = Result<Vec<u8>>>> FramesExt for T {}

pin_project! {
    /// A stream combinator that runs chunks through a [`FrameDecoder`]
    pub struct Frames<S> {
        #[pin]
        stream: S,
        decoder: FrameDecoder,
        done: bool,
    }
}

impl<S> Frames<S> {
    pub fn new(stream: S, decoder: FrameDecoder) -> Self {
        Self { stream, decoder, done: false }
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered_len(&self) -> usize {
        self.decoder.buffered()
    }
}

impl<S: Stream<Item = Result<Vec<u8>>>> Stream for Frames<S> {
    type Item = Result<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return Poll::Ready(None);
            }

            // Hand out frames already buffered before reading more
            match this.decoder.next_frame() {
                Ok(Some(frame)) => return Poll::Ready(Some(Ok(frame))),
                Ok(None) => {}
                Err(e) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(AgentError::Framing(e))));
                }
            }

            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    trace!(len = chunk.len(), "Chunk received");
                    this.decoder.push(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    debug!(buffered = this.decoder.buffered(), "Byte stream ended");
                    *this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FramingError;
    use futures::{StreamExt, stream};

    fn part(body: &str) -> Vec<u8> {
        format!(
            "--xyz\r\nContent-type: application/json\r\nContent-length: {}\r\n\r\n{}\r\n",
            body.len(),
            body
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn chunks_become_frames_in_order() {
        let mut bytes = part("{\"a\":1}");
        bytes.extend(part("{\"b\":2}"));
        let chunks: Vec<Result<Vec<u8>>> = bytes.chunks(3).map(|c| Ok(c.to_vec())).collect();

        let frames: Vec<Vec<u8>> = stream::iter(chunks)
            .frames(FrameDecoder::new("xyz"))
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(frames, vec![b"{\"a\":1}".to_vec(), b"{\"b\":2}".to_vec()]);
    }

    #[tokio::test]
    async fn framing_error_ends_the_stream() {
        let bad = b"--xyz\r\nContent-type: application/json\r\n\r\n{}".to_vec();
        let mut chunks = vec![Ok(part("{}")), Ok(bad)];
        chunks.push(Ok(part("{}")));

        let items: Vec<Result<Vec<u8>>> =
            stream::iter(chunks).frames(FrameDecoder::new("xyz")).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(
            items[1],
            Err(AgentError::Framing(FramingError::MissingContentLength))
        ));
    }

    #[tokio::test]
    async fn transport_error_is_forwarded() {
        let chunks = vec![Ok(part("{}")), Err(AgentError::connection_failed("reset"))];
        let items: Vec<Result<Vec<u8>>> =
            stream::iter(chunks).frames(FrameDecoder::new("xyz")).collect().await;
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(AgentError::Http { .. })));
    }
}
