//! The listener side of push OTA.
//!
//! [`PushOtaServer`] binds the configured port, accepts exactly one
//! connection, enables TCP keepalive on it and hands the stream to a
//! [`micro_ota::connection::Receiver`]. The listening socket is closed right
//! after the accept, so a second client is refused while a transfer runs.
//!
//! The `pushota` binary wraps this with [`config::load`] and a
//! [`micro_ota::storage::FileStorage`]. Its exit status is `0` when the
//! device may be restarted, `2` when the session ended cleanly but nothing
//! changed, and `1` on failure.

pub mod config;
mod server;

pub use config::OtaConfig;
pub use server::{BoundServer, PushOtaServer, PushOtaServerBuilder, ServerBuildError, ServerError};
