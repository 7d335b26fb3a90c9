use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Every way decoding an incoming body can end other than success.
///
/// `Framing` always leaves the connection unusable: once the wire position is no longer trusted the
/// owner must close it. `Mapping` and `AlreadyConsumed` never touch the connection state.
#[derive(Error, Debug)]
pub enum BodyError {
    #[error("invalid body framing: {reason}")]
    Framing { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("sink rejected body bytes: {source}")]
    Sink { source: io::Error },

    #[error("mapping error: {source}")]
    Mapping {
        #[from]
        source: MappingError,
    },

    #[error("body has been consumed")]
    AlreadyConsumed,

    #[error("computation cancelled")]
    Cancelled,
}

impl BodyError {
    pub fn framing<S: ToString>(str: S) -> Self {
        Self::Framing { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn sink<E: Into<io::Error>>(e: E) -> Self {
        Self::Sink { source: e.into() }
    }

    pub fn mapping<S: ToString>(str: S) -> Self {
        Self::Mapping { source: MappingError::new(str) }
    }

    #[inline]
    pub fn is_framing(&self) -> bool {
        matches!(self, BodyError::Framing { .. })
    }

    #[inline]
    pub fn is_already_consumed(&self) -> bool {
        matches!(self, BodyError::AlreadyConsumed)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BodyError::Cancelled)
    }
}

/// The body bytes did not match the structure a [`Mapper`](crate::protocol::Mapper) expected.
#[derive(Error, Debug)]
#[error("{reason}")]
pub struct MappingError {
    reason: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl MappingError {
    pub fn new<S: ToString>(reason: S) -> Self {
        Self { reason: reason.to_string(), source: None }
    }

    pub fn with_source<S, E>(reason: S, source: E) -> Self
    where
        S: ToString,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self { reason: reason.to_string(), source: Some(source.into()) }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}
