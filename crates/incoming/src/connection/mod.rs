//! Connection sharing for incoming message bodies.
//!
//! This module owns the byte-level side of body decoding: the live connection a response arrived
//! on and the source a single decode pulls its bytes through.
//!
//! # Components
//!
//! - [`Connection`]: the shared connection that:
//!   - Owns the IO object and a pooled read buffer
//!   - Stays alive while either the message or a decode in flight references it
//!   - Tracks whether it is still positioned on a trustworthy message boundary
//! - [`BodySource`]: the single consumer of the connection's bytes for one body, able to drive a
//!   [`PayloadDecoder`](crate::codec::PayloadDecoder) on a blocking or an async IO object
//!
//! # Features
//!
//! - Bounded reads, a content-length body never consumes bytes of what follows
//! - Bytes already read past the head can be handed over as prefetched input
//! - Read buffers are recycled through a process-wide [`Pool`](crate::pool::Pool)

mod body_source;
mod shared;

pub use body_source::BodySource;
pub use shared::{Connection, ConnectionId, read_buffer_pool};
