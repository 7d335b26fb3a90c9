//! Body decoding into caller-chosen sinks.
//!
//! [`BodyDecoder`] turns the bytes of a message body into one of:
//! - a byte sink (`std::io::Write` or `tokio::io::AsyncWrite`)
//! - an in-memory buffer, optionally validated as a string
//! - a structured object, built by a [`Mapper`](crate::protocol::Mapper)
//!
//! [`DecodedBody`] exposes the same framing-decoded bytes piece by piece, as an iterator or as an
//! [`http_body::Body`].

mod body_decoder;
mod decoded_body;

pub use body_decoder::{BodyDecoder, DEFAULT_READ_BUFFER_SIZE, DecoderConfig};
pub use decoded_body::DecodedBody;
