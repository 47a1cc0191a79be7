//! Codecs for the push update exchange.
//!
//! - [`HeaderDecoder`]: accumulates the request head up to the `\r\n\r\n` separator
//! - [`PayloadDecoder`]: cuts the firmware payload to its declared length
//! - [`ResponseEncoder`]: writes the single status response
//!
//! The decoders implement `tokio_util::codec::Decoder` but are driven by the
//! [`Receiver`](crate::connection::Receiver) directly rather than through
//! `FramedRead`, because the receiver bounds every read by the buffer capacity
//! and the remaining payload length.

mod header_decoder;
mod payload_decoder;
mod response_encoder;

pub use header_decoder::HEADER_SEPARATOR;
pub use header_decoder::HeaderDecoder;
pub use payload_decoder::PayloadDecoder;
pub use response_encoder::ResponseEncoder;
