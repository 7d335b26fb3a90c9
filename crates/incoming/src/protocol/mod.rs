//! Core protocol types for incoming messages.
//!
//! # Architecture
//!
//! - **Message Items** ([`message`]): what the transfer readers produce
//!   - [`PayloadItem`]: a chunk of logical body bytes or EOF
//!   - [`PayloadSize`]: how a body is framed on the wire
//!   - [`TransferState`]: observable state of a transfer reader
//!
//! - **Response Head** ([`response`]): [`ResponseHeader`] wraps the already parsed status line and
//!   headers and selects the body framing from them
//!
//! - **Mapping** ([`mapper`]): the [`Mapper`] plug-in contract for structured bodies
//!
//! - **Error Handling** ([`error`]): [`BodyError`] and [`MappingError`]

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;
pub use message::TransferState;

mod response;
pub use response::ResponseHeader;

mod mapper;
pub use mapper::FnMapper;
pub use mapper::JsonMapper;
pub use mapper::Mapper;

mod error;
pub use error::BodyError;
pub use error::MappingError;
