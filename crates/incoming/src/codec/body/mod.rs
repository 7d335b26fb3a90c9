//! Transfer readers for incoming message bodies.
//!
//! Each reader is a framing state machine over a window of connection bytes, implementing
//! [`tokio_util::codec::Decoder`]. They strip framing metadata and yield only logical body bytes.
//!
//! # Components
//!
//! - [`ChunkedDecoder`]: chunked transfer encoded payloads
//! - [`LengthDecoder`]: fixed-length payloads
//! - [`UnboundedDecoder`]: payloads delimited by the connection closing
//! - [`PayloadDecoder`]: main decoder that coordinates the strategies above
//!
//! # Features
//!
//! - Support for chunked transfer encoding (RFC 7230)
//! - Content-Length based payload handling that never reads past the body
//! - Streaming processing of message bodies
//! - Efficient memory usage through BytesMut
//! - State machine based processing

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;
mod unbounded_decoder;

pub use chunked_decoder::ChunkedDecoder;
pub use length_decoder::LengthDecoder;
pub use payload_decoder::PayloadDecoder;
pub use unbounded_decoder::UnboundedDecoder;
