use std::future::poll_fn;
use std::io::Read;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use tokio::io::AsyncRead;

use crate::codec::PayloadDecoder;
use crate::connection::{BodySource, Connection};
use crate::protocol::{BodyError, PayloadItem, TransferState};

/// A message body with its framing already removed.
///
/// Pairs a [`BodySource`] with the transfer reader chosen for the message, and yields the logical
/// body bytes in wire order. On an async IO object it is an [`http_body::Body`], so it composes
/// with `http_body_util::BodyExt`; on a blocking one it is an [`Iterator`].
///
/// Dropping the body before its end leaves the connection in the middle of a message, so the
/// connection is marked unusable.
pub struct DecodedBody<IO> {
    source: BodySource<IO>,
    decoder: PayloadDecoder,
    window: usize,
}

impl<IO> DecodedBody<IO> {
    pub fn new(source: BodySource<IO>, decoder: PayloadDecoder, window: usize) -> Self {
        Self { source, decoder, window }
    }

    pub fn transfer_state(&self) -> TransferState {
        self.decoder.state()
    }

    pub fn connection(&self) -> &Arc<Connection<IO>> {
        self.source.connection()
    }

    fn on_item(item: PayloadItem) -> Option<Bytes> {
        match item {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

impl<IO: Read> DecodedBody<IO> {
    /// Blocks until the next piece of the body is available; `None` once the body is complete.
    pub fn next_chunk_blocking(&mut self) -> Result<Option<Bytes>, BodyError> {
        if self.decoder.state().is_terminal() {
            return Ok(None);
        }
        let item = self.source.decode_blocking(&mut self.decoder, self.window)?;
        Ok(Self::on_item(item))
    }
}

impl<IO: AsyncRead + Unpin> DecodedBody<IO> {
    pub fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, BodyError>>> {
        if self.decoder.state().is_terminal() {
            return Poll::Ready(None);
        }
        let item = ready!(self.source.poll_decode(cx, &mut self.decoder, self.window));
        Poll::Ready(item.map(Self::on_item).transpose())
    }

    /// Waits for the next piece of the body; `None` once the body is complete.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, BodyError> {
        poll_fn(|cx| self.poll_chunk(cx)).await.transpose()
    }
}

impl<IO: Read> Iterator for DecodedBody<IO> {
    type Item = Result<Bytes, BodyError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk_blocking().transpose()
    }
}

impl<IO: AsyncRead + Unpin> Body for DecodedBody<IO> {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        this.poll_chunk(cx).map(|chunk| chunk.map(|result| result.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.decoder.state().is_terminal()
    }

    fn size_hint(&self) -> SizeHint {
        match self.decoder.state() {
            TransferState::Bounded { remaining } => SizeHint::with_exact(remaining),
            TransferState::Done | TransferState::Failed => SizeHint::with_exact(0),
            _ => SizeHint::default(),
        }
    }
}

impl<IO> Drop for DecodedBody<IO> {
    fn drop(&mut self) {
        if !self.decoder.state().is_terminal() {
            self.source.connection().mark_unusable("body dropped before its end");
        }
    }
}

impl<IO> std::fmt::Debug for DecodedBody<IO> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedBody")
            .field("source", &self.source)
            .field("state", &self.decoder.state())
            .field("window", &self.window)
            .finish()
    }
}
