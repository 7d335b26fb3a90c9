//! Incoming HTTP/1.1 message bodies
//!
//! This crate is the body layer of an HTTP/1.1 client: given a response head that was already
//! parsed and the connection it arrived on, it removes the body framing and delivers the body
//! into a byte sink, an in-memory buffer, or a structured object. Every operation comes in a
//! blocking form and in a suspending form run by a small computation engine on top of tokio.
//!
//! # Features
//!
//! - Chunked transfer-coding, Content-Length and close-delimited bodies
//! - Blocking decodes over `std::io::Read`, suspending decodes over `tokio::io::AsyncRead`
//! - Suspending computations that can be awaited inline, started, observed and cancelled
//! - Single-use bodies: a second decode fails cleanly instead of reading garbage
//! - Connections shared between a message and its decode, closed by whoever lets go last
//! - Pooled read buffers
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//! use std::sync::Arc;
//! use http::{HeaderMap, HeaderValue, StatusCode, header};
//! use micro_http_incoming::connection::Connection;
//! use micro_http_incoming::decoder::BodyDecoder;
//! use micro_http_incoming::incoming::IncomingMessage;
//! use micro_http_incoming::protocol::ResponseHeader;
//!
//! let mut headers = HeaderMap::new();
//! headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
//! let head = ResponseHeader::new(StatusCode::OK, "OK", headers);
//!
//! let wire = Cursor::new(b"6\r\nHello \r\n6\r\nWorld!\r\n0\r\n\r\n".to_vec());
//! let message = IncomingMessage::new(head, Connection::new(wire), Arc::new(BodyDecoder::new()));
//!
//! assert_eq!(message.read_body_to_string().unwrap(), "Hello World!");
//! assert!(message.read_body_to_string().unwrap_err().is_already_consumed());
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`codec`]: Transfer readers, one per body framing
//! - [`connection`]: The shared connection and the byte source a decode reads from
//! - [`decoder`]: Body decoding into sinks, buffers and objects
//! - [`engine`]: Suspending computations
//! - [`incoming`]: The received message and its single-use body
//! - [`pool`]: Bounded object recycling
//! - [`protocol`]: Protocol types, the mapper contract and errors
//!
//! # Core Components
//!
//! ## Framing
//!
//! [`protocol::ResponseHeader::payload_size`] picks the body framing from the head following
//! RFC 7230 section 3.3.3, and [`codec::PayloadDecoder`] runs the matching transfer reader.
//! A content-length body never reads past its last byte, so what follows stays on the connection.
//!
//! ## Suspending Computations
//!
//! Async decode operations return an [`engine::Starter`]. Awaiting it runs the decode inline;
//! [`engine::Engine::start`] runs it as its own task and returns an [`engine::Computation`]
//! that reports its [`engine::ComputationState`], including what it is suspended on, and can be
//! cancelled.
//!
//! ## Error Handling
//!
//! All operations fail with [`protocol::BodyError`]. A framing error leaves the connection
//! marked unusable; a mapping error leaves it intact.
//!
//! # Limitations
//!
//! - HTTP/1.1 only
//! - The status line and headers must be parsed by the caller
//! - Keep-alive policy is up to the connection owner, see
//!   [`connection::Connection::is_reusable`]

pub mod codec;
pub mod connection;
pub mod decoder;
pub mod engine;
pub mod incoming;
pub mod pool;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
