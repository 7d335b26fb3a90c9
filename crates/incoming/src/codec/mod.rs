//! Wire-level decoding of incoming message bodies.
//!
//! The status line and headers are parsed before this layer runs; what remains on the wire is
//! the body, framed by chunked transfer-coding, a Content-Length, or the connection closing.
//! The [`body`] module holds one transfer reader per framing plus the [`PayloadDecoder`] that
//! picks between them.
//!
//! # Example
//!
//! ```
//! use micro_http_incoming::codec::PayloadDecoder;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = PayloadDecoder::chunked();
//! let mut buffer = BytesMut::from(&b"5\r\nhello\r\n0\r\n\r\n"[..]);
//! let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(&chunk.into_bytes().unwrap()[..], b"hello");
//! assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
//! ```

pub mod body;

pub use body::PayloadDecoder;
