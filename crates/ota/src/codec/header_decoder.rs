//! Header accumulation for the push update request.
//!
//! The decoder looks for the `\r\n\r\n` separator in the bytes received so far
//! and splits the header region off the front of the buffer. Anything after
//! the separator stays in the buffer: those are payload bytes that arrived in
//! the same read as the end of the headers and must be forwarded, not read again.
//!
//! The search is resumable. Each call only scans the bytes that arrived since
//! the previous call, plus the last three bytes already scanned, so a
//! separator split across two reads is still found.

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, RequestHead};
use crate::utils::find_subslice;

/// Separator between the header region and the payload
pub const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Decoder for the request head implementing the [`Decoder`] trait.
///
/// `max_size` is the number of bytes the header region may occupy, separator
/// included. Once the buffer holds that many bytes without a separator the
/// decoder fails with [`ParseError::TooLargeHeader`].
#[derive(Debug)]
pub struct HeaderDecoder {
    max_size: usize,
    scanned: usize,
}

impl HeaderDecoder {
    pub fn new(max_size: usize) -> Self {
        Self { max_size, scanned: 0 }
    }

    /// Maximum size of the header region in bytes
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Decoder for HeaderDecoder {
    type Item = RequestHead;
    type Error = ParseError;

    /// Attempts to locate the end of the header region in `src`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(head))` once the separator is found, `src` then only holds the leftover payload bytes
    /// - `Ok(None)` if more data is needed
    /// - `Err(ParseError::TooLargeHeader)` if the buffer is full without a separator
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.scanned.saturating_sub(HEADER_SEPARATOR.len() - 1);

        match find_subslice(&src[start..], HEADER_SEPARATOR) {
            Some(index) => {
                let body_offset = start + index + HEADER_SEPARATOR.len();
                trace!(body_offset, leftover = src.len() - body_offset, "located end of headers");

                let header = src.split_to(body_offset);
                self.scanned = 0;
                Ok(Some(RequestHead::parse(&header)))
            }
            None => {
                ensure!(src.len() < self.max_size, ParseError::too_large_header(src.len(), self.max_size));
                self.scanned = src.len();
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ContentLength, Method};
    use indoc::indoc;

    #[test]
    fn test_bytes_mut_lens() {
        let str = indoc! {"
        POST / HTTP/1.1\r
        Host: 127.0.0.1:8888\r
        User-Agent: curl/7.79.1\r
        Content-Length: 3\r
        \r
        123"};

        let mut bytes = BytesMut::from(str);
        let mut header_decoder = HeaderDecoder::new(1023);

        let head = header_decoder.decode(&mut bytes).unwrap().unwrap();

        assert_eq!(head.method(), Method::Post);
        assert_eq!(head.content_length(), ContentLength::Length(3));
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn separator_split_across_reads() {
        let mut decoder = HeaderDecoder::new(1023);
        let mut bytes = BytesMut::from(&b"DELETE / HTTP/1.1\r\n"[..]);
        assert!(decoder.decode(&mut bytes).unwrap().is_none());

        bytes.extend_from_slice(b"\r");
        assert!(decoder.decode(&mut bytes).unwrap().is_none());

        bytes.extend_from_slice(b"\nAB");
        let head = decoder.decode(&mut bytes).unwrap().unwrap();
        assert_eq!(head.method(), Method::Delete);
        assert_eq!(&bytes[..], b"AB");
    }

    #[test]
    fn separator_is_not_found_in_payload_only() {
        let mut decoder = HeaderDecoder::new(1023);
        let mut bytes = BytesMut::from(&b"GET / HTTP/1.1\r\n\r\n\r\n\r\n"[..]);
        let head = decoder.decode(&mut bytes).unwrap().unwrap();
        assert_eq!(head.method(), Method::Get);
        // only the first separator ends the header region
        assert_eq!(&bytes[..], b"\r\n\r\n");
    }

    #[test]
    fn too_large_header() {
        let mut decoder = HeaderDecoder::new(15);
        let mut bytes = BytesMut::from(&b"POST / HTTP/1.1"[..]);

        match decoder.decode(&mut bytes) {
            Err(ParseError::TooLargeHeader { current_size, max_size }) => {
                assert_eq!(current_size, 15);
                assert_eq!(max_size, 15);
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn separator_at_the_limit_is_accepted() {
        let mut decoder = HeaderDecoder::new(16);
        let mut bytes = BytesMut::from(&b"DELETE /ab\r\n\r\n"[..]);
        assert_eq!(bytes.len(), 14);
        assert!(decoder.decode(&mut bytes).unwrap().is_some());
        assert!(bytes.is_empty());
    }
}
