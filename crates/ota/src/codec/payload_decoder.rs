//! Decoder for the firmware payload.
//!
//! The payload length is taken from the `Content-Length:` field and is exact:
//! once it is reached the decoder yields `Eof` and any further bytes in the
//! buffer are not part of the image.

use std::{cmp, io};

use crate::protocol::PayloadItem;
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// A decoder for a payload with a known length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    /// The number of bytes remaining to be read from the payload
    remaining: u64,
}

impl PayloadDecoder {
    /// Creates a new `PayloadDecoder` expecting exactly `length` bytes.
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    /// The number of payload bytes not yet decoded
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Returns true once the whole payload was decoded
    #[inline]
    pub fn is_finish(&self) -> bool {
        self.remaining == 0
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = io::Error;

    /// Decodes bytes from the input buffer according to the remaining length.
    ///
    /// # Returns
    /// * `Ok(Some(PayloadItem::Eof))` when all bytes have been read
    /// * `Ok(Some(PayloadItem::Chunk(bytes)))` with at most `remaining` bytes
    /// * `Ok(None)` when more data is needed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        // never hand out more than the declared length
        let len = usize::try_from(self.remaining).map_or(src.len(), |remaining| cmp::min(remaining, src.len()));
        let bytes = src.split_to(len).freeze();

        self.remaining -= bytes.len() as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}
