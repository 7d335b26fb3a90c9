use std::cmp;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::codec::Decoder;
use tokio_util::io::poll_read_buf;
use tracing::trace;

use crate::codec::PayloadDecoder;
use crate::connection::Connection;
use crate::connection::shared::ConnectionInner;
use crate::engine::{WaitCondition, note_wait};
use crate::protocol::{BodyError, PayloadItem};

/// The single consumer of a connection's inbound bytes for one message body.
///
/// A source holds a strong reference to its connection for as long as it lives; dropping it is
/// what releases a decode's claim on the connection.
pub struct BodySource<IO> {
    connection: Arc<Connection<IO>>,
}

impl<IO> BodySource<IO> {
    pub fn new(connection: Arc<Connection<IO>>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<Connection<IO>> {
        &self.connection
    }

    /// Runs the transfer reader on what is already buffered.
    ///
    /// `Ok(None)` means more bytes must be read from the IO object first.
    fn decode_buffered(
        connection: &Connection<IO>,
        inner: &mut ConnectionInner<IO>,
        decoder: &mut PayloadDecoder,
    ) -> Result<Option<PayloadItem>, BodyError> {
        let buffer: &mut BytesMut = &mut inner.read_buf;
        let decoded = if inner.eof { decoder.decode_eof(buffer) } else { decoder.decode(buffer) };

        match decoded {
            Ok(Some(PayloadItem::Eof)) if decoder.is_unbounded() => {
                connection.mark_unusable("close-delimited body consumed the connection");
                Ok(Some(PayloadItem::Eof))
            }
            Ok(None) if inner.eof => {
                connection.mark_unusable("end of data inside body");
                Err(BodyError::framing("connection closed before body was complete"))
            }
            Ok(item) => Ok(item),
            Err(e) => {
                connection.mark_unusable("body framing violated");
                Err(e)
            }
        }
    }
}

impl<IO: Read> BodySource<IO> {
    /// Produces the next body item, blocking the calling thread on the IO object when needed.
    ///
    /// At most `decoder.read_limit(window)` bytes are read at a time, so a content-length body
    /// never pulls bytes belonging to what follows it.
    pub fn decode_blocking(&mut self, decoder: &mut PayloadDecoder, window: usize) -> Result<PayloadItem, BodyError> {
        let mut guard = self.connection.lock();
        let inner = &mut *guard;

        loop {
            if let Some(item) = Self::decode_buffered(&self.connection, inner, decoder)? {
                return Ok(item);
            }

            let limit = cmp::max(decoder.read_limit(window), 1);
            let start = inner.read_buf.len();
            inner.read_buf.resize(start + limit, 0);
            let result = inner.io.read(&mut inner.read_buf[start..]);
            let read = *result.as_ref().unwrap_or(&0);
            inner.read_buf.truncate(start + read);

            match result {
                Ok(0) => inner.eof = true,
                Ok(n) => trace!(connection = %self.connection.id(), read = n, "read body bytes"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.connection.mark_unusable("read failed inside body");
                    return Err(BodyError::io(e));
                }
            }
        }
    }
}

impl<IO: AsyncRead + Unpin> BodySource<IO> {
    /// Polls for the next body item.
    ///
    /// When the IO object is not ready the wait is recorded on the running computation, if any,
    /// and the task is woken by the IO object once bytes arrive.
    pub fn poll_decode(
        &mut self,
        cx: &mut Context<'_>,
        decoder: &mut PayloadDecoder,
        window: usize,
    ) -> Poll<Result<PayloadItem, BodyError>> {
        let mut guard = self.connection.lock();
        let inner = &mut *guard;

        loop {
            if let Some(item) = Self::decode_buffered(&self.connection, inner, decoder)? {
                return Poll::Ready(Ok(item));
            }

            let limit = cmp::max(decoder.read_limit(window), 1);
            inner.read_buf.reserve(limit);
            let buffer: &mut BytesMut = &mut inner.read_buf;
            let mut limited = buffer.limit(limit);

            match poll_read_buf(Pin::new(&mut inner.io), cx, &mut limited) {
                Poll::Pending => {
                    note_wait(WaitCondition::readable(self.connection.id()));
                    return Poll::Pending;
                }
                Poll::Ready(Ok(0)) => inner.eof = true,
                Poll::Ready(Ok(n)) => trace!(connection = %self.connection.id(), read = n, "read body bytes"),
                Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {}
                Poll::Ready(Err(e)) => {
                    self.connection.mark_unusable("read failed inside body");
                    return Poll::Ready(Err(BodyError::io(e)));
                }
            }
        }
    }
}

/// Raw byte access: buffered bytes first, then the IO object.
impl<IO: Read> Read for BodySource<IO> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.connection.lock();
        let inner = &mut *guard;

        if !inner.read_buf.is_empty() {
            let n = cmp::min(buf.len(), inner.read_buf.len());
            buf[..n].copy_from_slice(&inner.read_buf[..n]);
            inner.read_buf.advance(n);
            return Ok(n);
        }

        if inner.eof {
            return Ok(0);
        }
        inner.io.read(buf)
    }
}

impl<IO: AsyncRead + Unpin> AsyncRead for BodySource<IO> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut guard = this.connection.lock();
        let inner = &mut *guard;

        if !inner.read_buf.is_empty() {
            let n = cmp::min(buf.remaining(), inner.read_buf.len());
            buf.put_slice(&inner.read_buf[..n]);
            inner.read_buf.advance(n);
            return Poll::Ready(Ok(()));
        }

        if inner.eof {
            return Poll::Ready(Ok(()));
        }

        let polled = Pin::new(&mut inner.io).poll_read(cx, buf);
        if polled.is_pending() {
            note_wait(WaitCondition::readable(this.connection.id()));
        }
        polled
    }
}

impl<IO> std::fmt::Debug for BodySource<IO> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodySource").field("connection", &self.connection.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        max: usize,
        reads: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            if self.reads % 2 == 0 {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            let n = cmp::min(cmp::min(buf.len(), self.max), self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn collect(source: &mut BodySource<impl Read>, decoder: &mut PayloadDecoder) -> Result<Vec<u8>, BodyError> {
        let mut body = Vec::new();
        loop {
            match source.decode_blocking(decoder, 8 * 1024)? {
                PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                PayloadItem::Eof => return Ok(body),
            }
        }
    }

    #[test]
    fn chunked_across_small_reads() {
        let data = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n".to_vec();
        let io = Trickle { data, pos: 0, max: 3, reads: 0 };
        let mut source = BodySource::new(Connection::new(io));

        let body = collect(&mut source, &mut PayloadDecoder::chunked()).unwrap();
        assert_eq!(body, b"hello world");
        assert!(source.connection().is_reusable());
    }

    #[test]
    fn length_does_not_read_past_body() {
        let io = Cursor::new(b"abcdefNEXT".to_vec());
        let connection = Connection::new(io);
        let mut source = BodySource::new(Arc::clone(&connection));

        let body = collect(&mut source, &mut PayloadDecoder::fix_length(6)).unwrap();
        assert_eq!(body, b"abcdef");
        assert_eq!(connection.buffered(), 0);

        let mut rest = String::new();
        BodySource::new(connection).read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "NEXT");
    }

    #[test]
    fn prefetched_bytes_come_first() {
        let io = Cursor::new(b"lo".to_vec());
        let mut source = BodySource::new(Connection::with_prefetched(io, b"hel"));
        let body = collect(&mut source, &mut PayloadDecoder::fix_length(5)).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn premature_close_breaks_connection() {
        let io = Cursor::new(b"abc".to_vec());
        let mut source = BodySource::new(Connection::new(io));

        let error = collect(&mut source, &mut PayloadDecoder::fix_length(10)).unwrap_err();
        assert!(error.is_framing());
        assert!(!source.connection().is_reusable());
    }

    #[test]
    fn close_delimited_consumes_connection() {
        let io = Cursor::new(b"until close".to_vec());
        let mut source = BodySource::new(Connection::new(io));

        let body = collect(&mut source, &mut PayloadDecoder::unbounded()).unwrap();
        assert_eq!(body, b"until close");
        assert!(!source.connection().is_reusable());
    }

    #[test]
    fn empty_body_reads_nothing() {
        let io = Trickle { data: b"garbage".to_vec(), pos: 0, max: 64, reads: 0 };
        let connection = Connection::new(io);
        let mut source = BodySource::new(Arc::clone(&connection));

        assert!(source.decode_blocking(&mut PayloadDecoder::empty(), 8 * 1024).unwrap().is_eof());
        drop(source);
        assert_eq!(connection.lock().io.reads, 0);
    }

    #[tokio::test]
    async fn poll_decode_chunked() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut source = BodySource::new(Connection::new(server));

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"3\r\nabc\r\n").await.unwrap();
            client.write_all(b"0\r\n\r\n").await.unwrap();
        });

        let mut decoder = PayloadDecoder::chunked();
        let mut body = Vec::new();
        loop {
            let item = std::future::poll_fn(|cx| source.poll_decode(cx, &mut decoder, 8 * 1024)).await.unwrap();
            match item {
                PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                PayloadItem::Eof => break,
            }
        }
        assert_eq!(body, b"abc");
        assert!(decoder.is_done());
    }
}
