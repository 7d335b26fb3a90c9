//! Decoder implementation for incoming message bodies.
//!
//! This module provides a unified transfer reader for the different body framings:
//! - Content-Length based payloads
//! - Chunked transfer encoding
//! - Close-delimited payloads
//! - Messages with no body
//!
//! The framing is chosen from the message head (see
//! [`ResponseHeader::payload_size`](crate::protocol::ResponseHeader::payload_size)).

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::codec::body::unbounded_decoder::UnboundedDecoder;
use crate::protocol::{BodyError, PayloadItem, PayloadSize, TransferState};
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::error;

/// A unified transfer reader for incoming message bodies.
///
/// Once any framing error is reported the decoder is `Failed` for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    /// The specific decoding strategy to use
    kind: Kind,
    failed: bool,
    finished: bool,
}

/// Enum representing different payload decoding strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// Decode payload with a fixed content length
    Length(LengthDecoder),

    /// Decode payload using chunked transfer encoding
    Chunked(ChunkedDecoder),

    /// Decode payload until the connection closes
    Unbounded(UnboundedDecoder),

    /// Handle messages with no body
    NoBody,
}

impl PayloadDecoder {
    fn with_kind(kind: Kind) -> Self {
        Self { kind, failed: false, finished: false }
    }

    /// Creates a PayloadDecoder for messages with no body.
    pub fn empty() -> Self {
        Self::with_kind(Kind::NoBody)
    }

    /// Creates a PayloadDecoder for chunked transfer encoding.
    pub fn chunked() -> Self {
        Self::with_kind(Kind::Chunked(ChunkedDecoder::new()))
    }

    /// Creates a PayloadDecoder for a fixed-length payload.
    ///
    /// # Arguments
    /// * `size` - The expected content length in bytes
    pub fn fix_length(size: u64) -> Self {
        Self::with_kind(Kind::Length(LengthDecoder::new(size)))
    }

    /// Creates a PayloadDecoder for a close-delimited payload.
    pub fn unbounded() -> Self {
        Self::with_kind(Kind::Unbounded(UnboundedDecoder::new()))
    }

    /// Returns whether this decoder handles chunked transfer encoding.
    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    /// Returns whether this decoder handles messages with no body.
    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }

    /// Returns whether this decoder handles fixed-length payloads.
    pub fn is_fix_length(&self) -> bool {
        matches!(self.kind, Kind::Length(_))
    }

    /// Returns whether this decoder reads until the connection closes.
    pub fn is_unbounded(&self) -> bool {
        matches!(self.kind, Kind::Unbounded(_))
    }

    /// The current transfer reader state.
    pub fn state(&self) -> TransferState {
        if self.failed {
            return TransferState::Failed;
        }
        if self.finished {
            return TransferState::Done;
        }

        match &self.kind {
            Kind::Length(decoder) if decoder.remaining() == 0 => TransferState::Done,
            Kind::Length(decoder) => TransferState::Bounded { remaining: decoder.remaining() },
            Kind::Chunked(decoder) => decoder.state(),
            Kind::Unbounded(decoder) if decoder.is_eof() => TransferState::Done,
            Kind::Unbounded(_) => TransferState::Unbounded,
            Kind::NoBody => TransferState::Done,
        }
    }

    /// Returns true once the whole body has been delivered.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.state() == TransferState::Done
    }

    /// How many bytes may be pulled from the connection for the next read.
    ///
    /// Content-length bodies never read past their end, so bytes of a following message stay on
    /// the connection.
    pub fn read_limit(&self, window: usize) -> usize {
        match &self.kind {
            Kind::Length(decoder) => usize::try_from(decoder.remaining()).unwrap_or(usize::MAX).min(window),
            Kind::NoBody => 0,
            Kind::Chunked(_) | Kind::Unbounded(_) => window,
        }
    }

    fn track(&mut self, result: Result<Option<PayloadItem>, BodyError>) -> Result<Option<PayloadItem>, BodyError> {
        match &result {
            Ok(Some(PayloadItem::Eof)) => self.finished = true,
            Err(e) => {
                error!(cause = %e, "failed to decode body framing");
                self.failed = true;
            }
            _ => {}
        }
        result
    }
}

/// Builds the transfer reader matching a framing decision.
impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => PayloadDecoder::fix_length(length),
            PayloadSize::Chunked => PayloadDecoder::chunked(),
            PayloadSize::Empty => PayloadDecoder::empty(),
            PayloadSize::Unbounded => PayloadDecoder::unbounded(),
        }
    }
}

/// Delegates to the appropriate decoder based on the payload type.
impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = BodyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.failed {
            return Err(BodyError::framing("body decoder already failed"));
        }

        let result = match &mut self.kind {
            Kind::Length(length_decoder) => length_decoder.decode(src),
            Kind::Chunked(chunked_decoder) => chunked_decoder.decode(src),
            Kind::Unbounded(unbounded_decoder) => unbounded_decoder.decode(src),
            Kind::NoBody => Ok(Some(PayloadItem::Eof)),
        };
        self.track(result)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.failed {
            return Err(BodyError::framing("body decoder already failed"));
        }

        let result = match &mut self.kind {
            Kind::Length(length_decoder) => length_decoder.decode_eof(src),
            Kind::Chunked(chunked_decoder) => chunked_decoder.decode_eof(src),
            Kind::Unbounded(unbounded_decoder) => unbounded_decoder.decode_eof(src),
            Kind::NoBody => Ok(Some(PayloadItem::Eof)),
        };
        self.track(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_payload_size() {
        assert!(PayloadDecoder::from(PayloadSize::Chunked).is_chunked());
        assert!(PayloadDecoder::from(PayloadSize::Length(3)).is_fix_length());
        assert!(PayloadDecoder::from(PayloadSize::Empty).is_empty());
        assert!(PayloadDecoder::from(PayloadSize::Unbounded).is_unbounded());
    }

    #[test]
    fn states() {
        assert_eq!(PayloadDecoder::empty().state(), TransferState::Done);
        assert_eq!(PayloadDecoder::fix_length(0).state(), TransferState::Done);
        assert_eq!(PayloadDecoder::fix_length(9).state(), TransferState::Bounded { remaining: 9 });
        assert_eq!(PayloadDecoder::chunked().state(), TransferState::AwaitingChunkSize);
        assert_eq!(PayloadDecoder::unbounded().state(), TransferState::Unbounded);
    }

    #[test]
    fn failure_is_terminal() {
        let mut decoder = PayloadDecoder::chunked();
        let mut buffer = BytesMut::from(&b"g\r\n"[..]);
        assert!(decoder.decode(&mut buffer).unwrap_err().is_framing());
        assert_eq!(decoder.state(), TransferState::Failed);

        let mut buffer = BytesMut::from(&b"0\r\n\r\n"[..]);
        assert!(decoder.decode(&mut buffer).is_err());
        assert_eq!(decoder.state(), TransferState::Failed);
    }

    #[test]
    fn read_limit() {
        assert_eq!(PayloadDecoder::fix_length(10).read_limit(8192), 10);
        assert_eq!(PayloadDecoder::fix_length(100_000).read_limit(8192), 8192);
        assert_eq!(PayloadDecoder::chunked().read_limit(8192), 8192);
        assert_eq!(PayloadDecoder::empty().read_limit(8192), 0);
    }

    #[test]
    fn no_body() {
        let mut decoder = PayloadDecoder::empty();
        let mut buffer = BytesMut::from(&b"HTTP/1.1 200 OK"[..]);
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert_eq!(buffer.len(), 15);
    }
}
