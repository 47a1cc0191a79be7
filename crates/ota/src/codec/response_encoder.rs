use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::Encoder;

use crate::protocol::Response;

const PROTOCOL_VERSION: &[u8] = b"HTTP/1.0 ";

/// Encodes the status response as `HTTP/1.0 <status-line>\r\n\r\n[body]`.
#[derive(Debug, Default)]
pub struct ResponseEncoder;

impl ResponseEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Response> for ResponseEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let status = item.status().as_str();
        let body = item.body().unwrap_or_default();

        dst.reserve(PROTOCOL_VERSION.len() + status.len() + 4 + body.len());
        dst.put_slice(PROTOCOL_VERSION);
        dst.put_slice(status.as_bytes());
        dst.put_slice(b"\r\n\r\n");
        dst.put_slice(body.as_bytes());
        Ok(())
    }
}
