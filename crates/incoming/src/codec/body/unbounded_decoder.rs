//! Decoder for close-delimited bodies.
//!
//! Without chunked coding or a Content-Length, a response body runs until the peer closes the
//! connection ([RFC 7230 Section 3.3.3](https://tools.ietf.org/html/rfc7230#section-3.3.3), rule 7).

use crate::protocol::{BodyError, PayloadItem};
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

/// Passes every byte through until the source signals end of data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnboundedDecoder {
    eof: bool,
}

impl UnboundedDecoder {
    pub fn new() -> Self {
        Self { eof: false }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

impl Decoder for UnboundedDecoder {
    type Item = PayloadItem;
    type Error = BodyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.eof {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let bytes = src.split().freeze();
        trace!(len = bytes.len(), "read close-delimited bytes");
        Ok(Some(PayloadItem::Chunk(bytes)))
    }

    /// End of data is the only way this body ends, so it is never an error here.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        trace!("peer closed, close-delimited body finished");
        self.eof = true;
        Ok(Some(PayloadItem::Eof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_everything_until_eof() {
        let mut decoder = UnboundedDecoder::new();
        let mut buffer = BytesMut::from(&b"no length here"[..]);

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&chunk.into_bytes().unwrap()[..], b"no length here");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"!");
        assert!(decoder.decode_eof(&mut buffer).unwrap().unwrap().is_chunk());
        assert!(decoder.decode_eof(&mut buffer).unwrap().unwrap().is_eof());
        assert!(decoder.is_eof());
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
