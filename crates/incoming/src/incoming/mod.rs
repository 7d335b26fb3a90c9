//! Received HTTP messages.
//!
//! An [`IncomingMessage`] couples an already parsed response head with the body still waiting on
//! its connection. Its convenience methods route through the [`BodyDecoder`](crate::decoder::BodyDecoder)
//! the message was created with. Message heads can be recycled through
//! [`response_header_pool`].

mod incoming_message;

pub use incoming_message::{IncomingMessage, response_header_pool};
