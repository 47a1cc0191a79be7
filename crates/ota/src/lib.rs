//! A single-shot push OTA firmware receiver
//!
//! This crate accepts one firmware image pushed over a plain socket with a
//! minimal HTTP-like request, e.g.
//!
//! ```text
//! curl <device>:8888 --data-binary @build/firmware.bin
//! ```
//!
//! and streams it straight into the inactive firmware slot, so the device
//! boots the new image on its next restart. It is meant for devices with a
//! small fixed receive buffer and a forward-only flash write API: the image
//! is never held in memory as a whole.
//!
//! # Protocol
//!
//! - `POST` with a `Content-Length:` header: upload the image that follows the `\r\n\r\n` separator
//! - `DELETE`: cancel the update before it begins
//! - `GET` (when enabled): query the running firmware version
//!
//! Every session is answered with exactly one `HTTP/1.0 <status>\r\n\r\n[body]`
//! response, unless the stream failed before the request head was complete.
//!
//! # Example
//!
//! ```no_run
//! use micro_ota::connection::{Receiver, ReceiverConfig};
//! use micro_ota::storage::FileStorage;
//! use tokio::net::TcpListener;
//! use tracing::{error, info};
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = FileStorage::open("ota", &["ota_0", "ota_1"], 1024 * 1024, "1.0.0").await.unwrap();
//!     let listener = TcpListener::bind("0.0.0.0:8888").await.unwrap();
//!
//!     let (stream, _remote_addr) = listener.accept().await.unwrap();
//!     drop(listener);
//!
//!     let (reader, writer) = stream.into_split();
//!     let mut receiver = Receiver::new(storage).with_config(ReceiverConfig::default());
//!     match receiver.receive(reader, writer).await {
//!         Ok(outcome) => info!(?outcome, restart = outcome.is_restart_safe(), "session finished"),
//!         Err(e) => error!(cause = %e, "session failed"),
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`connection`]: the [`Receiver`](connection::Receiver) session state machine
//! - [`codec`]: header accumulation, payload length bounding and response encoding
//! - [`protocol`]: request, response, outcome and error types
//! - [`storage`]: the [`OtaStorage`](storage::OtaStorage) trait and its memory and file backends
//!
//! # Limitations
//!
//! - One connection per session, no pipelining
//! - No chunked transfer encoding, the payload length must be declared
//! - No authentication and no TLS

pub mod codec;
pub mod connection;
pub mod protocol;
pub mod storage;

#[cfg(test)]
mod testing;
mod utils;
pub(crate) use utils::ensure;
