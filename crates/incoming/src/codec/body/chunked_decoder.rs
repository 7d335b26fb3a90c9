//! Decoder implementation for HTTP chunked transfer encoding.
//!
//! This module decodes bodies that use chunked transfer encoding as specified in
//! [RFC 7230 Section 4.1](https://tools.ietf.org/html/rfc7230#section-4.1).
//!
//! The sender transmits the body as a series of chunks, each prefixed by its size in hexadecimal,
//! and ends it with a zero-sized chunk followed by optional trailer fields.

use crate::protocol::{BodyError, PayloadItem, TransferState};
use bytes::{Buf, Bytes, BytesMut};
use std::task::Poll;
use tokio_util::codec::Decoder;
use tracing::trace;
use ChunkedState::*;

/// A decoder for handling HTTP chunked transfer encoding.
///
/// The decoder processes incoming bytes according to the chunked format:
/// - Each chunk starts with its size in hexadecimal
/// - Followed by optional extensions and CRLF
/// - Then the chunk data and CRLF
/// - A zero-sized chunk, optional trailers and a blank line end the body
///
/// Any framing violation moves the decoder into a failed state it never leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
}

impl ChunkedDecoder {
    /// Creates a new ChunkedDecoder instance.
    ///
    /// The decoder starts in the SizeStart state, ready to read the size of the first chunk.
    pub fn new() -> Self {
        Self { state: SizeStart, remaining_size: 0 }
    }

    /// Reports where in the chunk grammar the decoder currently is.
    pub fn state(&self) -> TransferState {
        match self.state {
            SizeStart | Size | SizeLws | Extension | SizeLf => TransferState::AwaitingChunkSize,
            Body => TransferState::ReadingChunkData { remaining: self.remaining_size },
            BodyCr | BodyLf => TransferState::AwaitingChunkTerminator,
            Trailer | TrailerLf | EndCr | EndLf => TransferState::ReadingTrailers,
            End => TransferState::Done,
            Failed => TransferState::Failed,
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Read the first hex digit of the chunk size
    SizeStart,
    /// Read the remaining hex digits of the chunk size
    Size,
    /// Handle whitespace after size
    SizeLws,
    /// Skip chunk extensions
    Extension,
    /// Read LF after chunk size
    SizeLf,
    /// Read chunk data
    Body,
    /// Read CR after chunk data
    BodyCr,
    /// Read LF after chunk data
    BodyLf,
    /// Read optional trailer fields
    Trailer,
    /// Read LF after trailer
    TrailerLf,
    /// Read final CR
    EndCr,
    /// Read final LF
    EndLf,
    /// Final state after reading last chunk
    End,
    /// The framing was violated
    Failed,
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = BodyError;

    /// Decodes chunked transfer encoded data from the input buffer.
    ///
    /// # Returns
    /// - `Ok(Some(PayloadItem::Chunk(bytes)))` when chunk data is available
    /// - `Ok(Some(PayloadItem::Eof))` once the last chunk and trailers are read
    /// - `Ok(None)` when more data is needed
    /// - `Err(BodyError::Framing)` if the chunked encoding is invalid
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                End => {
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }
                Failed => return Err(BodyError::framing("chunked decoder already failed")),
                _ => {}
            }

            if src.is_empty() {
                // need more data
                return Ok(None);
            }

            let mut buf = None;

            self.state = match self.state.step(src, &mut self.remaining_size, &mut buf) {
                Poll::Pending => return Ok(None),
                Poll::Ready(Ok(new_state)) => new_state,
                Poll::Ready(Err(e)) => {
                    self.state = Failed;
                    return Err(e);
                }
            };

            if let Some(bytes) = buf {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }

    /// Called once the source has no more bytes: anything short of the terminating chunk is a
    /// premature end of the body.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => {
                self.state = Failed;
                Err(BodyError::framing("connection closed before the last chunk"))
            }
        }
    }
}

macro_rules! try_next_byte {
    ($src:ident) => {{
        if $src.len() > 0 {
            $src.get_u8()
        } else {
            return Poll::Pending;
        }
    }};
}

impl ChunkedState {
    /// Processes the next step in the chunked decoding state machine.
    ///
    /// # Arguments
    /// * `src` - Source buffer containing the chunked data
    /// * `remaining_size` - Tracks remaining bytes in current chunk
    /// * `buf` - Receives decoded chunk data, if this step produced any
    fn step(&self, src: &mut BytesMut, remaining_size: &mut u64, buf: &mut Option<Bytes>) -> Poll<Result<ChunkedState, BodyError>> {
        match self {
            SizeStart => ChunkedState::read_size_start(src, remaining_size),
            Size => ChunkedState::read_size(src, remaining_size),
            SizeLws => ChunkedState::read_size_lws(src),
            Extension => ChunkedState::read_extension(src),
            SizeLf => ChunkedState::read_size_lf(src, remaining_size),
            Body => ChunkedState::read_body(src, remaining_size, buf),
            BodyCr => ChunkedState::read_body_cr(src),
            BodyLf => ChunkedState::read_body_lf(src),
            Trailer => ChunkedState::read_trailer(src),
            TrailerLf => ChunkedState::read_trailer_lf(src),
            EndCr => ChunkedState::read_end_cr(src),
            EndLf => ChunkedState::read_end_lf(src),
            End => Poll::Ready(Ok(End)),
            Failed => Poll::Ready(Err(BodyError::framing("chunked decoder already failed"))),
        }
    }

    /// Reads the first digit of the chunk size. A size line must start with a hex digit, so an
    /// empty line, bare whitespace or a bare extension is rejected instead of read as the last
    /// chunk.
    fn read_size_start(src: &mut BytesMut, size_per_chunk: &mut u64) -> Poll<Result<ChunkedState, BodyError>> {
        let b = try_next_byte!(src);
        match hex_value(b) {
            Some(digit) => {
                *size_per_chunk = u64::from(digit);
                Poll::Ready(Ok(Size))
            }
            None => Poll::Ready(Err(BodyError::framing(format!("invalid chunk size line: expected hex digit, got {b:#04x}")))),
        }
    }

    /// Reads the remaining digits of the chunk size in hexadecimal format, digit by digit.
    ///
    /// # State Transitions
    /// - On hex digit (0-9, a-f, A-F): Stay in Size state to read more digits
    /// - On whitespace (tab/space): Transition to SizeLws state
    /// - On semicolon: Transition to Extension state to handle chunk extensions
    /// - On CR: Transition to SizeLf state to finish size line
    /// - On invalid character or overflow: Return error
    fn read_size(src: &mut BytesMut, size_per_chunk: &mut u64) -> Poll<Result<ChunkedState, BodyError>> {
        let b = try_next_byte!(src);
        if let Some(digit) = hex_value(b) {
            return match size_per_chunk.checked_mul(16).and_then(|size| size.checked_add(u64::from(digit))) {
                Some(size) => {
                    *size_per_chunk = size;
                    Poll::Ready(Ok(Size))
                }
                None => Poll::Ready(Err(BodyError::framing("invalid overflow chunked length"))),
            };
        }

        match b {
            b'\t' | b' ' => Poll::Ready(Ok(SizeLws)),
            b';' => Poll::Ready(Ok(Extension)),
            b'\r' => Poll::Ready(Ok(SizeLf)),
            b => Poll::Ready(Err(BodyError::framing(format!("invalid chunk size line: unexpected byte {b:#04x}")))),
        }
    }

    /// Processes linear whitespace after the chunk size; no more digits may follow.
    fn read_size_lws(src: &mut BytesMut) -> Poll<Result<ChunkedState, BodyError>> {
        match try_next_byte!(src) {
            b'\t' | b' ' => Poll::Ready(Ok(SizeLws)),
            b';' => Poll::Ready(Ok(Extension)),
            b'\r' => Poll::Ready(Ok(SizeLf)),
            _ => Poll::Ready(Err(BodyError::framing("invalid chunk size linear white space"))),
        }
    }

    /// Skips chunk extensions up to the CRLF that ends the size line.
    ///
    /// Extensions containing a bare LF are rejected, so a peer that forgets the CR cannot smuggle
    /// a chunk boundary past us.
    fn read_extension(src: &mut BytesMut) -> Poll<Result<ChunkedState, BodyError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(SizeLf)),
            b'\n' => Poll::Ready(Err(BodyError::framing("invalid chunk extension contains newline"))),
            _ => Poll::Ready(Ok(Extension)), // no supported extensions
        }
    }

    /// Validates the LF ending the size line; a size of 0 marks the last chunk.
    fn read_size_lf(src: &mut BytesMut, size_per_chunk: &mut u64) -> Poll<Result<ChunkedState, BodyError>> {
        match try_next_byte!(src) {
            b'\n' => {
                if *size_per_chunk == 0 {
                    Poll::Ready(Ok(EndCr))
                } else {
                    Poll::Ready(Ok(Body))
                }
            }

            _ => Poll::Ready(Err(BodyError::framing("invalid chunk size LF"))),
        }
    }

    /// Reads up to `size_per_chunk` bytes of chunk data from the input buffer.
    ///
    /// # State Transitions
    /// - On empty input: Stay in Body state
    /// - After reading data with remaining size > 0: Stay in Body state
    /// - After reading data with remaining size = 0: Move to BodyCr state
    fn read_body(src: &mut BytesMut, size_per_chunk: &mut u64, buf: &mut Option<Bytes>) -> Poll<Result<ChunkedState, BodyError>> {
        if src.is_empty() {
            return Poll::Ready(Ok(Body));
        }

        if *size_per_chunk == 0 {
            return Poll::Ready(Ok(BodyCr));
        }

        // cap remaining bytes at the max capacity of usize
        let remaining = usize::try_from(*size_per_chunk).unwrap_or(usize::MAX);

        let read_size = std::cmp::min(remaining, src.len());

        *size_per_chunk -= read_size as u64;
        let bytes = src.split_to(read_size).freeze();
        *buf = Some(bytes);

        if *size_per_chunk > 0 { Poll::Ready(Ok(Body)) } else { Poll::Ready(Ok(BodyCr)) }
    }

    /// Validates the CR after chunk data.
    fn read_body_cr(src: &mut BytesMut) -> Poll<Result<ChunkedState, BodyError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(BodyLf)),
            _ => Poll::Ready(Err(BodyError::framing("invalid chunk body CR"))),
        }
    }

    /// Validates the LF after chunk data and moves on to the next size line.
    fn read_body_lf(src: &mut BytesMut) -> Poll<Result<ChunkedState, BodyError>> {
        match try_next_byte!(src) {
            b'\n' => Poll::Ready(Ok(SizeStart)),
            _ => Poll::Ready(Err(BodyError::framing("invalid chunk body LF"))),
        }
    }

    /// Skips a trailer field up to its CR. Trailers are read but not kept.
    fn read_trailer(src: &mut BytesMut) -> Poll<Result<ChunkedState, BodyError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(TrailerLf)),
            _ => Poll::Ready(Ok(Trailer)),
        }
    }

    fn read_trailer_lf(src: &mut BytesMut) -> Poll<Result<ChunkedState, BodyError>> {
        match try_next_byte!(src) {
            b'\n' => Poll::Ready(Ok(EndCr)),
            _ => Poll::Ready(Err(BodyError::framing("invalid trailer end LF"))),
        }
    }

    /// A CR here starts the final blank line; anything else begins another trailer field.
    fn read_end_cr(src: &mut BytesMut) -> Poll<Result<ChunkedState, BodyError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(EndLf)),
            _ => Poll::Ready(Ok(Trailer)),
        }
    }

    fn read_end_lf(src: &mut BytesMut) -> Poll<Result<ChunkedState, BodyError>> {
        match try_next_byte!(src) {
            b'\n' => Poll::Ready(Ok(End)),
            _ => Poll::Ready(Err(BodyError::framing("invalid chunk end LF"))),
        }
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b + 10 - b'a'),
        b'A'..=b'F' => Some(b + 10 - b'A'),
        _ => None,
    }
}
