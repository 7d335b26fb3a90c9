use std::future::poll_fn;
use std::io::{self, Read, Write};
use std::pin::Pin;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{info, trace};

use crate::codec::PayloadDecoder;
use crate::connection::BodySource;
use crate::decoder::DecodedBody;
use crate::engine::{Starter, WaitCondition, note_wait};
use crate::ensure;
use crate::protocol::{BodyError, Mapper, MappingError, ResponseHeader};

/// Default number of bytes read from a connection at a time.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    read_buffer_size: usize,
}

impl DecoderConfig {
    pub fn new() -> Self {
        Self { read_buffer_size: DEFAULT_READ_BUFFER_SIZE }
    }

    /// Sets how many bytes at most are read from a connection at a time; zero is raised to one.
    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size.max(1);
        self
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes message bodies into sinks, buffers and objects.
///
/// The decoder picks the transfer reader from the message head, then drives it over the body
/// source until the body ends. Every operation has a blocking form, for `std::io::Read` sources,
/// and a suspending form returning a [`Starter`], for `tokio::io::AsyncRead` sources. Suspending
/// forms never block a thread: while the connection or sink is not ready the computation is
/// parked.
///
/// A decoder holds no per-message state and is meant to be shared, usually as an
/// `Arc<BodyDecoder>` bound to every incoming message of a client.
#[derive(Debug, Default)]
pub struct BodyDecoder {
    config: DecoderConfig,
}

impl BodyDecoder {
    pub fn new() -> Self {
        Self::with_config(DecoderConfig::default())
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// The transfer reader for the body following `head`.
    pub fn transfer_reader(&self, head: &ResponseHeader) -> PayloadDecoder {
        let payload_size = head.payload_size();
        trace!(status = %head.status(), ?payload_size, "selected body framing");
        PayloadDecoder::from(payload_size)
    }

    /// The body following `head`, with its framing removed.
    pub fn decoded_body<IO>(&self, head: &ResponseHeader, source: BodySource<IO>) -> DecodedBody<IO> {
        DecodedBody::new(source, self.transfer_reader(head), self.config.read_buffer_size)
    }

    /// Streams the body into `sink` and returns the number of bytes written.
    pub fn decode_to_sink<IO, W>(&self, head: &ResponseHeader, source: BodySource<IO>, sink: &mut W) -> Result<u64, BodyError>
    where
        IO: Read,
        W: Write + ?Sized,
    {
        let mut body = self.decoded_body(head, source);
        let mut written = 0u64;
        while let Some(bytes) = body.next_chunk_blocking()? {
            sink.write_all(&bytes).map_err(BodyError::sink)?;
            written += bytes.len() as u64;
        }
        sink.flush().map_err(BodyError::sink)?;
        Ok(written)
    }

    /// Reads the whole body into memory.
    pub fn decode_to_buffer<IO: Read>(&self, head: &ResponseHeader, source: BodySource<IO>) -> Result<Bytes, BodyError> {
        let mut body = self.decoded_body(head, source);
        let mut buffer = Accumulator::default();
        while let Some(bytes) = body.next_chunk_blocking()? {
            buffer.push(bytes);
        }
        Ok(buffer.finish())
    }

    /// Reads the whole body and validates it as UTF-8.
    pub fn decode_to_string<IO: Read>(&self, head: &ResponseHeader, source: BodySource<IO>) -> Result<String, BodyError> {
        into_string(self.decode_to_buffer(head, source)?)
    }

    /// Reads the whole body and hands it to `mapper`.
    pub fn decode_to_object<IO, T, M>(&self, head: &ResponseHeader, source: BodySource<IO>, mapper: M) -> Result<T, BodyError>
    where
        IO: Read,
        M: Mapper<T>,
    {
        let bytes = self.decode_to_buffer(head, source)?;
        mapper.parse(&bytes).map_err(BodyError::from)
    }

    /// Reads and discards the body, leaving the connection at the next message boundary.
    pub fn skip<IO: Read>(&self, head: &ResponseHeader, source: BodySource<IO>) -> Result<u64, BodyError> {
        let mut body = self.decoded_body(head, source);
        let mut skipped = 0u64;
        while let Some(bytes) = body.next_chunk_blocking()? {
            skipped += bytes.len() as u64;
        }
        if skipped > 0 {
            info!(size = skipped, "skip response body");
        }
        Ok(skipped)
    }

    /// Suspending form of [`decode_to_sink`](BodyDecoder::decode_to_sink).
    pub fn decode_to_sink_async<'a, IO, W>(&self, head: &ResponseHeader, source: BodySource<IO>, mut sink: W) -> Starter<'a, u64>
    where
        IO: AsyncRead + Unpin + Send + 'a,
        W: AsyncWrite + Unpin + Send + 'a,
    {
        let mut body = self.decoded_body(head, source);
        Starter::new(async move {
            let mut written = 0u64;
            while let Some(bytes) = body.next_chunk().await? {
                written += bytes.len() as u64;
                write_to_sink(&mut sink, bytes).await?;
            }
            sink.flush().await.map_err(BodyError::sink)?;
            Ok(written)
        })
    }

    /// Suspending form of [`decode_to_buffer`](BodyDecoder::decode_to_buffer).
    pub fn decode_to_buffer_async<'a, IO>(&self, head: &ResponseHeader, source: BodySource<IO>) -> Starter<'a, Bytes>
    where
        IO: AsyncRead + Unpin + Send + 'a,
    {
        let mut body = self.decoded_body(head, source);
        Starter::new(async move {
            let mut buffer = Accumulator::default();
            while let Some(bytes) = body.next_chunk().await? {
                buffer.push(bytes);
            }
            Ok(buffer.finish())
        })
    }

    /// Suspending form of [`decode_to_string`](BodyDecoder::decode_to_string).
    pub fn decode_to_string_async<'a, IO>(&self, head: &ResponseHeader, source: BodySource<IO>) -> Starter<'a, String>
    where
        IO: AsyncRead + Unpin + Send + 'a,
    {
        let buffered = self.decode_to_buffer_async(head, source);
        Starter::new(async move { into_string(buffered.await?) })
    }

    /// Suspending form of [`decode_to_object`](BodyDecoder::decode_to_object).
    pub fn decode_to_object_async<'a, IO, T, M>(&self, head: &ResponseHeader, source: BodySource<IO>, mapper: M) -> Starter<'a, T>
    where
        IO: AsyncRead + Unpin + Send + 'a,
        T: Send + 'a,
        M: Mapper<T> + Send + 'a,
    {
        let buffered = self.decode_to_buffer_async(head, source);
        Starter::new(async move {
            let bytes = buffered.await?;
            mapper.parse(&bytes).map_err(BodyError::from)
        })
    }

    /// Suspending form of [`skip`](BodyDecoder::skip).
    pub fn skip_async<'a, IO>(&self, head: &ResponseHeader, source: BodySource<IO>) -> Starter<'a, u64>
    where
        IO: AsyncRead + Unpin + Send + 'a,
    {
        let mut body = self.decoded_body(head, source);
        Starter::new(async move {
            let mut skipped = 0u64;
            while let Some(bytes) = body.next_chunk().await? {
                skipped += bytes.len() as u64;
            }
            if skipped > 0 {
                info!(size = skipped, "skip response body");
            }
            Ok(skipped)
        })
    }
}

/// Collects body pieces, avoiding a copy when the body arrived in one piece.
#[derive(Default)]
struct Accumulator {
    first: Option<Bytes>,
    rest: Option<BytesMut>,
}

impl Accumulator {
    fn push(&mut self, bytes: Bytes) {
        match (&mut self.first, &mut self.rest) {
            (None, _) => self.first = Some(bytes),
            (Some(first), None) => {
                let mut joined = BytesMut::with_capacity(first.len() + bytes.len());
                joined.extend_from_slice(first);
                joined.extend_from_slice(&bytes);
                self.rest = Some(joined);
            }
            (Some(_), Some(joined)) => joined.extend_from_slice(&bytes),
        }
    }

    fn finish(self) -> Bytes {
        match (self.first, self.rest) {
            (_, Some(joined)) => joined.freeze(),
            (Some(first), None) => first,
            (None, None) => Bytes::new(),
        }
    }
}

fn into_string(bytes: Bytes) -> Result<String, BodyError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| BodyError::from(MappingError::with_source("body is not valid UTF-8", e)))
}

/// Writes all of `bytes`, recording the sink as the wait condition while it is not ready.
async fn write_to_sink<W: AsyncWrite + Unpin>(sink: &mut W, mut bytes: Bytes) -> Result<(), BodyError> {
    while bytes.has_remaining() {
        let written = poll_fn(|cx| {
            let polled = Pin::new(&mut *sink).poll_write(cx, &bytes);
            if polled.is_pending() {
                note_wait(WaitCondition::sink_writable());
            }
            polled
        })
        .await
        .map_err(BodyError::sink)?;

        ensure!(written != 0, BodyError::sink(io::Error::from(io::ErrorKind::WriteZero)));
        bytes.advance(written);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::engine::{ComputationState, Direction, Engine, Outcome, ResourceId};
    use crate::protocol::{FnMapper, JsonMapper};
    use http::{HeaderMap, HeaderValue, StatusCode, header};
    use indoc::indoc;
    use serde::Deserialize;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    fn head(pairs: &[(header::HeaderName, &'static str)]) -> ResponseHeader {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(name.clone(), HeaderValue::from_static(*value));
        }
        ResponseHeader::new(StatusCode::OK, "OK", headers)
    }

    fn source(bytes: &[u8]) -> BodySource<Cursor<Vec<u8>>> {
        BodySource::new(Connection::new(Cursor::new(bytes.to_vec())))
    }

    /// A sink that accepts a limited number of bytes and then rejects everything.
    struct ShortSink {
        budget: usize,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_receives_chunked_body() {
        let wire = indoc! {"
            7\r
            Mozilla\r
            9\r
            Developer\r
            7\r
            Network\r
            0\r
            \r
        "};
        let decoder = BodyDecoder::new();
        let mut sink = Vec::new();

        let written = decoder.decode_to_sink(&head(&[(header::TRANSFER_ENCODING, "chunked")]), source(wire.as_bytes()), &mut sink).unwrap();

        assert_eq!(written, 23);
        assert_eq!(sink, b"MozillaDeveloperNetwork");
    }

    #[test]
    fn sink_error_breaks_connection() {
        let decoder = BodyDecoder::with_config(DecoderConfig::new().with_read_buffer_size(4));
        let source = source(b"0123456789");
        let connection = Arc::clone(source.connection());

        let error = decoder
            .decode_to_sink(&head(&[(header::CONTENT_LENGTH, "10")]), source, &mut ShortSink { budget: 4 })
            .unwrap_err();

        assert!(matches!(error, BodyError::Sink { .. }));
        assert!(!connection.is_reusable());
    }

    #[test]
    fn zero_length_write_is_a_sink_error() {
        let decoder = BodyDecoder::new();
        let mut sink: &mut [u8] = &mut [];
        let error = decoder.decode_to_sink(&head(&[(header::CONTENT_LENGTH, "3")]), source(b"abc"), &mut sink).unwrap_err();
        assert!(matches!(error, BodyError::Sink { .. }));
    }

    #[test]
    fn buffer_stops_at_content_length() {
        let decoder = BodyDecoder::new();
        let source = source(b"hello worldHTTP/1.1 200 OK");
        let connection = Arc::clone(source.connection());

        let body = decoder.decode_to_buffer(&head(&[(header::CONTENT_LENGTH, "11")]), source).unwrap();

        assert_eq!(&body[..], b"hello world");
        assert!(connection.is_reusable());
        let mut rest = String::new();
        BodySource::new(connection).read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "HTTP/1.1 200 OK");
    }

    #[test]
    fn small_window_joins_pieces() {
        let decoder = BodyDecoder::with_config(DecoderConfig::new().with_read_buffer_size(3));
        let body = decoder.decode_to_buffer(&head(&[]), source(b"read until the peer closes")).unwrap();
        assert_eq!(&body[..], b"read until the peer closes");
    }

    #[test]
    fn invalid_chunk_size_is_framing() {
        let decoder = BodyDecoder::new();
        let source = source(b"zz\r\nhello\r\n0\r\n\r\n");
        let connection = Arc::clone(source.connection());

        let error = decoder.decode_to_buffer(&head(&[(header::TRANSFER_ENCODING, "chunked")]), source).unwrap_err();

        assert!(error.is_framing());
        assert!(!connection.is_reusable());
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let decoder = BodyDecoder::new();
        let error = decoder.decode_to_string(&head(&[(header::CONTENT_LENGTH, "2")]), source(&[0xc3, 0x28])).unwrap_err();
        assert!(matches!(error, BodyError::Mapping { .. }));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Greeting {
        message: String,
    }

    #[test]
    fn object_through_json_mapper() {
        let decoder = BodyDecoder::new();
        let json = br#"{"message":"hi"}"#;
        let greeting: Greeting = decoder.decode_to_object(&head(&[(header::CONTENT_LENGTH, "16")]), source(json), JsonMapper).unwrap();
        assert_eq!(greeting, Greeting { message: "hi".into() });
    }

    #[test]
    fn mapping_failure_keeps_connection() {
        let decoder = BodyDecoder::new();
        let source = source(b"not json");
        let connection = Arc::clone(source.connection());

        let result: Result<Greeting, _> = decoder.decode_to_object(&head(&[(header::CONTENT_LENGTH, "8")]), source, JsonMapper);

        assert!(matches!(result, Err(BodyError::Mapping { .. })));
        assert!(connection.is_reusable());
    }

    #[test]
    fn skip_leaves_next_message() {
        let decoder = BodyDecoder::new();
        let source = source(b"3\r\nabc\r\n0\r\n\r\nNEXT");
        let connection = Arc::clone(source.connection());

        let skipped = decoder.skip(&head(&[(header::TRANSFER_ENCODING, "chunked")]), source).unwrap();

        assert_eq!(skipped, 3);
        assert!(connection.is_reusable());
        assert_eq!(connection.buffered(), 4);
    }

    #[tokio::test]
    async fn async_buffer_inline() {
        let decoder = BodyDecoder::new();
        let (mut client, server) = tokio::io::duplex(8);
        tokio::spawn(async move {
            client.write_all(b"4\r\nasync\r\n").await.unwrap_or_default();
        });

        // "async" is five bytes, so the chunk terminator is missing
        let result = decoder.decode_to_buffer_async(&head(&[(header::TRANSFER_ENCODING, "chunked")]), BodySource::new(Connection::new(server))).await;
        assert!(result.unwrap_err().is_framing());
    }

    #[tokio::test]
    async fn async_object_with_fn_mapper() {
        let decoder = BodyDecoder::new();
        let (mut client, server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            client.write_all(b"42").await.unwrap();
        });

        let mapper = FnMapper::new(|bytes: &[u8]| {
            std::str::from_utf8(bytes).ok().and_then(|text| text.parse::<u32>().ok()).ok_or_else(|| MappingError::new("not a number"))
        });
        let starter = decoder.decode_to_object_async(&head(&[(header::CONTENT_LENGTH, "2")]), BodySource::new(Connection::new(server)), mapper);

        let outcome = Engine::current().start(starter).await;
        assert_eq!(outcome.into_result().unwrap(), 42);
    }

    #[tokio::test]
    async fn async_sink_waits_on_sink() {
        let decoder = BodyDecoder::new();
        let (sink, mut drain) = tokio::io::duplex(4);
        let starter = decoder.decode_to_sink_async(&head(&[(header::CONTENT_LENGTH, "12")]), source(b"twelve bytes"), sink);

        let computation = Engine::current().start(starter);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !matches!(computation.state(), ComputationState::Suspended(Some(_))) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let wait = computation.state().wait_condition().unwrap();
        assert_eq!(wait.resource(), ResourceId::Sink);
        assert_eq!(wait.direction(), Direction::Writable);

        let mut received = Vec::new();
        let (read, outcome) = tokio::join!(tokio::io::AsyncReadExt::read_to_end(&mut drain, &mut received), computation);
        assert!(matches!(outcome, Outcome::Completed(12)));
        read.unwrap();
        assert_eq!(received, b"twelve bytes");
    }
}
