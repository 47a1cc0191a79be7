//! Request head extraction.
//!
//! The header region is never tokenized into individual fields. The method is
//! taken from the leading token and the payload length from the first
//! occurrence of the literal `Content-Length:`, which keeps the framing
//! compatible with what `curl --data-binary` sends regardless of how many
//! other header lines precede it.

use crate::protocol::Method;
use crate::utils::find_subslice;

const CONTENT_LENGTH: &[u8] = b"Content-Length:";

/// The declared payload length as found in the header region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContentLength {
    /// No `Content-Length:` field in the header region
    Missing,
    /// The field is present but the value is zero, negative, out of range or not a number
    Invalid,
    /// A positive payload length in bytes
    Length(u64),
}

/// The parts of a request head the receiver acts on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestHead {
    method: Method,
    content_length: ContentLength,
}

impl RequestHead {
    /// Builds the request head from the header region, separator included.
    pub fn parse(head: &[u8]) -> Self {
        Self { method: Method::classify(head), content_length: parse_content_length(head) }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn content_length(&self) -> ContentLength {
        self.content_length
    }
}

fn parse_content_length(head: &[u8]) -> ContentLength {
    match find_subslice(head, CONTENT_LENGTH) {
        Some(index) => parse_decimal(&head[index + CONTENT_LENGTH.len()..]),
        None => ContentLength::Missing,
    }
}

/// Parses a base-10 integer the way `strtol` does: leading whitespace is skipped,
/// an optional sign is accepted and parsing stops at the first non-digit.
fn parse_decimal(value: &[u8]) -> ContentLength {
    let mut rest = value;
    while let [first, tail @ ..] = rest {
        if !is_c_space(*first) {
            break;
        }
        rest = tail;
    }

    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    let mut length: u64 = 0;
    for digit in rest.iter().take_while(|b| b.is_ascii_digit()) {
        length = match length.checked_mul(10).and_then(|l| l.checked_add(u64::from(digit - b'0'))) {
            Some(length) => length,
            None => return ContentLength::Invalid,
        };
    }

    if length == 0 || negative {
        return ContentLength::Invalid;
    }
    ContentLength::Length(length)
}

fn is_c_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn from_curl() {
        let str = indoc! {"
        POST / HTTP/1.1\r
        Host: localhost:8888\r
        Authorization: Basic dXNlcjpwYXNz\r
        User-Agent: curl/7.64.1\r
        Accept: */*\r
        Content-Length: 182\r
        Content-Type: application/octet-stream\r
        \r
        "};

        let head = RequestHead::parse(str.as_bytes());

        assert_eq!(head.method(), Method::Post);
        assert_eq!(head.content_length(), ContentLength::Length(182));
    }

    #[test]
    fn length_field_position_does_not_matter() {
        let head = RequestHead::parse(b"POST / HTTP/1.1\r\nContent-Length: 7\r\nHost: a\r\n\r\n");
        assert_eq!(head.content_length(), ContentLength::Length(7));

        let head = RequestHead::parse(b"POST /upload HTTP/1.0\r\nX-A: b\r\nX-C: d\r\nContent-Length:9\r\n\r\n");
        assert_eq!(head.content_length(), ContentLength::Length(9));
    }

    #[test]
    fn strtol_like_parsing() {
        assert_eq!(parse_decimal(b" 42\r\n"), ContentLength::Length(42));
        assert_eq!(parse_decimal(b"\t\t42"), ContentLength::Length(42));
        assert_eq!(parse_decimal(b"+7\r\n"), ContentLength::Length(7));
        assert_eq!(parse_decimal(b" 12abc\r\n"), ContentLength::Length(12));
        assert_eq!(parse_decimal(b" 0\r\n"), ContentLength::Invalid);
        assert_eq!(parse_decimal(b" abc\r\n"), ContentLength::Invalid);
        assert_eq!(parse_decimal(b" -3\r\n"), ContentLength::Invalid);
        assert_eq!(parse_decimal(b"\r\n\r\n"), ContentLength::Invalid);
        assert_eq!(parse_decimal(b" 99999999999999999999999\r\n"), ContentLength::Invalid);
    }

    #[test]
    fn missing_length() {
        let head = RequestHead::parse(b"POST / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(head.content_length(), ContentLength::Missing);

        // the field name is matched literally
        let head = RequestHead::parse(b"POST / HTTP/1.1\r\ncontent-length: 4\r\n\r\n");
        assert_eq!(head.content_length(), ContentLength::Missing);
    }
}
