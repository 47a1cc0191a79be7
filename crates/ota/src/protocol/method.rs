/// Request method recognised by the push receiver.
///
/// Only the leading method token of the header region is inspected, so
/// `"POST /anything HTTP/1.1"` and `"POST /"` classify the same way.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    /// `GET `: firmware version query
    Get,
    /// `POST `: firmware upload
    Post,
    /// `DELETE `: cancel the update before it starts
    Delete,
    /// Any other token
    Unknown,
}

impl Method {
    /// Classifies the request by the literal method prefix of `head`.
    pub fn classify(head: &[u8]) -> Self {
        if head.starts_with(b"GET ") {
            Method::Get
        } else if head.starts_with(b"POST ") {
            Method::Post
        } else if head.starts_with(b"DELETE ") {
            Method::Delete
        } else {
            Method::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Unknown => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_prefix() {
        assert_eq!(Method::classify(b"GET / HTTP/1.1\r\n\r\n"), Method::Get);
        assert_eq!(Method::classify(b"POST / HTTP/1.1\r\n\r\n"), Method::Post);
        assert_eq!(Method::classify(b"DELETE /\r\n\r\n"), Method::Delete);
        assert_eq!(Method::classify(b"PUT / HTTP/1.1\r\n\r\n"), Method::Unknown);
    }

    #[test]
    fn token_needs_trailing_space() {
        assert_eq!(Method::classify(b"GETX / HTTP/1.1\r\n\r\n"), Method::Unknown);
        assert_eq!(Method::classify(b"POSTED\r\n\r\n"), Method::Unknown);
        assert_eq!(Method::classify(b"post / HTTP/1.1\r\n\r\n"), Method::Unknown);
        assert_eq!(Method::classify(b""), Method::Unknown);
    }
}
