use bytes::{Buf, Bytes};

/// Represents an item in a decoded body stream.
///
/// The transfer readers produce either logical body bytes (framing metadata already stripped)
/// or signal the end of the body (EOF).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    /// A chunk of body data
    Chunk(Data),
    /// Marks the end of the body
    Eof,
}

/// How the body of a message is framed on the wire.
///
/// - Known length: exactly that many bytes follow the head
/// - Chunked: chunked transfer-coding
/// - Empty: the message carries no body
/// - Unbounded: the body runs until the peer closes the connection
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Payload with known length in bytes
    Length(u64),
    /// Payload using chunked transfer encoding
    Chunked,
    /// Empty payload (no body)
    Empty,
    /// Close-delimited payload
    Unbounded,
}

impl PayloadSize {
    /// Returns true if the payload uses chunked transfer encoding
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    /// Returns true if the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty | PayloadSize::Length(0))
    }

    /// Returns true if the payload is delimited by the connection closing
    #[inline]
    pub fn is_unbounded(&self) -> bool {
        matches!(self, PayloadSize::Unbounded)
    }
}

/// Observable state of a transfer reader.
///
/// `Done` and `Failed` are terminal: a reader never leaves them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferState {
    /// Reading a chunk-size line, including its extensions
    AwaitingChunkSize,
    /// Inside the data of a chunk
    ReadingChunkData { remaining: u64 },
    /// Expecting the CRLF after chunk data
    AwaitingChunkTerminator,
    /// After the last chunk, reading trailer fields up to the final blank line
    ReadingTrailers,
    /// Content-length framing with `remaining` bytes still to deliver
    Bounded { remaining: u64 },
    /// Close-delimited framing
    Unbounded,
    Done,
    Failed,
}

impl TransferState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Done | TransferState::Failed)
    }
}

impl<D: Buf> PayloadItem<D> {
    /// Returns true if this item represents the end of the payload stream
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    /// Returns true if this item contains chunk data
    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }
}

impl PayloadItem {
    /// Returns a reference to the contained bytes if this is a Chunk
    ///
    /// Returns None if this is an EOF marker
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    /// Consumes the PayloadItem and returns the contained bytes if this is a Chunk
    ///
    /// Returns None if this is an EOF marker
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}
