use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use once_cell::sync::Lazy;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::connection::{BodySource, Connection};
use crate::decoder::{BodyDecoder, DecodedBody};
use crate::engine::Starter;
use crate::pool::{Pool, Pooled};
use crate::protocol::{BodyError, Mapper, ResponseHeader};

/// How many message heads the process-wide pool keeps for reuse.
const RESPONSE_HEADER_POOL_CAPACITY: usize = 32;

static RESPONSE_HEADER_POOL: Lazy<Arc<Pool<ResponseHeader>>> = Lazy::new(|| Arc::new(Pool::empty(RESPONSE_HEADER_POOL_CAPACITY)));

/// The pool message heads are recycled through, see [`IncomingMessage::pooled`].
pub fn response_header_pool() -> &'static Arc<Pool<ResponseHeader>> {
    &RESPONSE_HEADER_POOL
}

/// A received HTTP response: its head plus a body that can be decoded exactly once.
///
/// The head is immutable. The body is bound to the [`BodyDecoder`] and the [`Connection`] the
/// message arrived with; the first decode operation, successful or not, takes it, and every later
/// one fails with [`BodyError::AlreadyConsumed`] without touching the connection.
///
/// The message keeps the connection alive, and so does a decode in flight: whichever lets go last
/// closes it. Cancelling an async decode therefore releases the decode's claim while the message
/// still holds its own.
pub struct IncomingMessage<IO> {
    head: Pooled<ResponseHeader>,
    body: Mutex<Option<BodySource<IO>>>,
    decoder: Arc<BodyDecoder>,
    connection: Arc<Connection<IO>>,
}

impl<IO> IncomingMessage<IO> {
    pub fn new(head: ResponseHeader, connection: Arc<Connection<IO>>, decoder: Arc<BodyDecoder>) -> Self {
        Self::pooled(Pooled::unpooled(head), connection, decoder)
    }

    /// Builds a message around a head checked out of a pool, typically
    /// [`response_header_pool`]. The head goes back to its pool when the message is dropped.
    pub fn pooled(head: Pooled<ResponseHeader>, connection: Arc<Connection<IO>>, decoder: Arc<BodyDecoder>) -> Self {
        let body = BodySource::new(Arc::clone(&connection));
        debug!(connection = %connection.id(), status = %head.status(), "incoming message");
        Self { head, body: Mutex::new(Some(body)), decoder, connection }
    }

    pub fn status(&self) -> StatusCode {
        self.head.status()
    }

    pub fn status_description(&self) -> &str {
        self.head.status_description()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    pub fn head(&self) -> &ResponseHeader {
        &self.head
    }

    pub fn body_decoder(&self) -> &Arc<BodyDecoder> {
        &self.decoder
    }

    pub fn connection(&self) -> &Arc<Connection<IO>> {
        &self.connection
    }

    /// Whether a decode operation already took the body.
    pub fn is_body_consumed(&self) -> bool {
        self.body.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    fn take_body(&self) -> Result<BodySource<IO>, BodyError> {
        let taken = self.body.lock().unwrap_or_else(PoisonError::into_inner).take();
        taken.ok_or_else(|| {
            warn!(connection = %self.connection.id(), "body requested again after it was consumed");
            BodyError::AlreadyConsumed
        })
    }

    /// Takes the raw body bytes, framing included.
    ///
    /// The caller becomes responsible for honoring the body framing.
    pub fn body_stream(&self) -> Result<BodySource<IO>, BodyError> {
        self.take_body()
    }

    /// Takes the body with its framing removed.
    pub fn decoded_body(&self) -> Result<DecodedBody<IO>, BodyError> {
        let source = self.take_body()?;
        Ok(self.decoder.decoded_body(self.head(), source))
    }

    fn start_async<'a, T, F>(&self, f: F) -> Starter<'a, T>
    where
        T: Send + 'a,
        F: FnOnce(&BodyDecoder, &ResponseHeader, BodySource<IO>) -> Starter<'a, T>,
    {
        match self.take_body() {
            Ok(source) => f(&self.decoder, self.head(), source),
            Err(e) => Starter::failed(e),
        }
    }
}

impl<IO: Read> IncomingMessage<IO> {
    /// Streams the body into `sink`, returning the number of bytes written.
    pub fn stream_body<W: Write + ?Sized>(&self, sink: &mut W) -> Result<u64, BodyError> {
        self.decoder.decode_to_sink(self.head(), self.take_body()?, sink)
    }

    pub fn read_body_to_bytes(&self) -> Result<Bytes, BodyError> {
        self.decoder.decode_to_buffer(self.head(), self.take_body()?)
    }

    pub fn read_body_to_string(&self) -> Result<String, BodyError> {
        self.decoder.decode_to_string(self.head(), self.take_body()?)
    }

    pub fn read_body_to_object<T, M: Mapper<T>>(&self, mapper: M) -> Result<T, BodyError> {
        self.decoder.decode_to_object(self.head(), self.take_body()?, mapper)
    }

    /// Discards the body, returning how many bytes were skipped.
    pub fn skip_body(&self) -> Result<u64, BodyError> {
        self.decoder.skip(self.head(), self.take_body()?)
    }
}

/// The suspending forms take the body when called, not when the returned [`Starter`] runs.
impl<IO: AsyncRead + Unpin + Send> IncomingMessage<IO> {
    pub fn stream_body_async<'a, W>(&self, sink: W) -> Starter<'a, u64>
    where
        IO: 'a,
        W: AsyncWrite + Unpin + Send + 'a,
    {
        self.start_async(|decoder, head, source| decoder.decode_to_sink_async(head, source, sink))
    }

    pub fn read_body_to_bytes_async<'a>(&self) -> Starter<'a, Bytes>
    where
        IO: 'a,
    {
        self.start_async(BodyDecoder::decode_to_buffer_async)
    }

    pub fn read_body_to_string_async<'a>(&self) -> Starter<'a, String>
    where
        IO: 'a,
    {
        self.start_async(BodyDecoder::decode_to_string_async)
    }

    pub fn read_body_to_object_async<'a, T, M>(&self, mapper: M) -> Starter<'a, T>
    where
        IO: 'a,
        T: Send + 'a,
        M: Mapper<T> + Send + 'a,
    {
        self.start_async(|decoder, head, source| decoder.decode_to_object_async(head, source, mapper))
    }

    pub fn skip_body_async<'a>(&self) -> Starter<'a, u64>
    where
        IO: 'a,
    {
        self.start_async(BodyDecoder::skip_async)
    }
}

impl<IO> std::fmt::Debug for IncomingMessage<IO> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("head", self.head())
            .field("connection", &self.connection)
            .field("body_consumed", &self.is_body_consumed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Origin;
    use http::{HeaderValue, header};
    use std::io::Cursor;

    fn message(status: StatusCode, headers: &[(header::HeaderName, &'static str)], wire: &[u8]) -> IncomingMessage<Cursor<Vec<u8>>> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(name.clone(), HeaderValue::from_static(*value));
        }
        let head = ResponseHeader::new(status, status.canonical_reason().unwrap_or_default(), map);
        IncomingMessage::new(head, Connection::new(Cursor::new(wire.to_vec())), Arc::new(BodyDecoder::new()))
    }

    #[test]
    fn accessors() {
        let message = message(StatusCode::NOT_FOUND, &[(header::CONTENT_TYPE, "text/plain")], b"");
        assert_eq!(message.status(), StatusCode::NOT_FOUND);
        assert_eq!(message.status_description(), "Not Found");
        assert_eq!(message.headers().get(header::CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(Arc::strong_count(message.connection()), 2);
        assert!(!message.is_body_consumed());
    }

    #[test]
    fn second_decode_is_rejected() {
        let message = message(StatusCode::OK, &[(header::CONTENT_LENGTH, "5")], b"hello");

        assert_eq!(&message.read_body_to_bytes().unwrap()[..], b"hello");
        assert!(message.is_body_consumed());
        assert!(message.read_body_to_bytes().unwrap_err().is_already_consumed());
        assert!(message.skip_body().unwrap_err().is_already_consumed());
        assert!(message.body_stream().unwrap_err().is_already_consumed());
    }

    #[test]
    fn failed_decode_still_consumes() {
        let message = message(StatusCode::OK, &[(header::TRANSFER_ENCODING, "chunked")], b"x\r\n");

        assert!(message.read_body_to_string().unwrap_err().is_framing());
        assert!(message.read_body_to_string().unwrap_err().is_already_consumed());
        assert!(!message.connection().is_reusable());
    }

    #[test]
    fn body_source_released_after_decode() {
        let message = message(StatusCode::OK, &[(header::CONTENT_LENGTH, "2")], b"ok");
        assert_eq!(Arc::strong_count(message.connection()), 2);

        message.read_body_to_string().unwrap();
        assert_eq!(Arc::strong_count(message.connection()), 1);
    }

    #[test]
    fn stream_into_writer() {
        let message = message(StatusCode::OK, &[], b"close delimited");
        let mut sink = Vec::new();
        assert_eq!(message.stream_body(&mut sink).unwrap(), 15);
        assert_eq!(sink, b"close delimited");
    }

    #[test]
    fn pooled_head_returns_on_drop() {
        let pool = Arc::new(Pool::<ResponseHeader>::empty(1));

        let mut head = pool.acquire();
        head.set_status(StatusCode::OK);
        head.set_status_description("OK");
        head.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from_static("2"));

        let message = IncomingMessage::pooled(head, Connection::new(Cursor::new(b"ok".to_vec())), Arc::new(BodyDecoder::new()));
        assert_eq!(message.read_body_to_string().unwrap(), "ok");
        assert_eq!(pool.available(), 0);

        drop(message);
        assert_eq!(pool.available(), 1);

        let recycled = pool.acquire();
        assert_eq!(recycled.origin(), Origin::Pool);
        assert!(recycled.headers().is_empty());
        assert_eq!(recycled.status_description(), "");
    }

    #[test]
    fn shared_head_pool_capacity() {
        assert_eq!(response_header_pool().capacity(), 32);
    }

    #[tokio::test]
    async fn async_decode_consumes_at_call_time() {
        let message = message(StatusCode::OK, &[(header::CONTENT_LENGTH, "3")], b"abc");

        let starter = message.read_body_to_bytes_async();
        assert!(message.is_body_consumed());
        assert!(message.read_body_to_bytes_async().await.unwrap_err().is_already_consumed());

        assert_eq!(&starter.await.unwrap()[..], b"abc");
    }
}
