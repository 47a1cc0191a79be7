use std::io;
use thiserror::Error;

use crate::protocol::{Response, Status};

/// Errors raised while framing the request head.
///
/// Every variant except `Io` is answered with a status response and none of
/// them touches storage.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("method not allowed: {method}")]
    MethodNotAllowed { method: String },

    #[error("content-length required: {reason}")]
    LengthRequired { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn method_not_allowed<S: ToString>(method: S) -> Self {
        Self::MethodNotAllowed { method: method.to_string() }
    }

    pub fn length_required<S: ToString>(str: S) -> Self {
        Self::LengthRequired { reason: str.to_string() }
    }

    /// The status answered for this error, `None` when the stream itself failed
    pub fn status(&self) -> Option<Status> {
        match self {
            ParseError::TooLargeHeader { .. } => Some(Status::RequestHeaderFieldsTooLarge),
            ParseError::MethodNotAllowed { .. } => Some(Status::MethodNotAllowed),
            ParseError::LengthRequired { .. } => Some(Status::LengthRequired),
            ParseError::Io { .. } => None,
        }
    }
}

/// Generic failure.
pub const ERR_FAIL: i32 = -1;
/// Invalid argument, e.g. a slot the backend does not own.
pub const ERR_INVALID_ARG: i32 = 0x102;
/// A write session is already open.
pub const ERR_INVALID_STATE: i32 = 0x103;
/// The image does not fit the slot.
pub const ERR_INVALID_SIZE: i32 = 0x104;
/// The finished image failed verification.
pub const ERR_VALIDATE_FAILED: i32 = 0x1503;

/// Errors reported by an [`OtaStorage`](crate::storage::OtaStorage) backend.
///
/// Each variant maps to a numeric [`code`](StorageError::code) that is shown to
/// the peer in `Failed (<code>).` bodies.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("image size {size} exceed the slot capacity {capacity}")]
    InvalidSize { size: u64, capacity: u64 },

    #[error("unknown slot: {label}")]
    InvalidSlot { label: String },

    #[error("a write session is already in progress")]
    Busy,

    #[error("image validation failed: {reason}")]
    Validation { reason: String },

    #[error("device error {code}: {reason}")]
    Device { code: i32, reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl StorageError {
    pub fn invalid_size(size: u64, capacity: u64) -> Self {
        Self::InvalidSize { size, capacity }
    }

    pub fn invalid_slot<S: ToString>(label: S) -> Self {
        Self::InvalidSlot { label: label.to_string() }
    }

    pub fn validation<S: ToString>(str: S) -> Self {
        Self::Validation { reason: str.to_string() }
    }

    pub fn device<S: ToString>(code: i32, str: S) -> Self {
        Self::Device { code, reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Numeric error code reported to the peer
    pub fn code(&self) -> i32 {
        match self {
            StorageError::InvalidSize { .. } => ERR_INVALID_SIZE,
            StorageError::InvalidSlot { .. } => ERR_INVALID_ARG,
            StorageError::Busy => ERR_INVALID_STATE,
            StorageError::Validation { .. } => ERR_VALIDATE_FAILED,
            StorageError::Device { code, .. } => *code,
            StorageError::Io { source } => source.raw_os_error().unwrap_or(ERR_FAIL),
        }
    }
}

/// Terminal failure of one receive session.
///
/// All failures are handled inside the session. The peer only ever sees the
/// status line rendered by [`SessionError::response`].
#[derive(Error, Debug)]
pub enum SessionError {
    /// The stream failed or closed before the header terminator was found.
    /// No response can be sent.
    #[error("transport error: {source}")]
    Transport { source: io::Error },

    #[error("request error: {source}")]
    Framing {
        #[from]
        source: ParseError,
    },

    #[error("no ota slot available")]
    NoUpdateTarget,

    #[error("can't begin write on slot {slot}: {source}")]
    StorageOpen { slot: String, source: StorageError },

    #[error("slot write failed: {source}")]
    StorageWrite { source: StorageError },

    #[error("payload receive failed: {source}")]
    Receive { source: io::Error },

    #[error("incomplete transfer, {remaining} bytes missing")]
    IncompleteTransfer { remaining: u64 },

    #[error("image finalize failed: {source}")]
    StorageFinalize { source: StorageError },

    /// The image is durably written but the device will still boot the old one.
    #[error("can't set boot slot {slot}: {source}")]
    BootTarget { slot: String, source: StorageError },
}

impl SessionError {
    pub fn transport<E: Into<io::Error>>(e: E) -> Self {
        Self::Transport { source: e.into() }
    }

    pub(crate) fn peer_closed() -> Self {
        Self::transport(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed before end of headers"))
    }

    /// The response written back for this error, `None` when no response is possible
    pub fn response(&self) -> Option<Response> {
        match self {
            SessionError::Transport { .. } => None,
            SessionError::Framing { source } => source.status().map(Response::new),
            SessionError::NoUpdateTarget => Some(Response::new(Status::NotImplemented)),
            SessionError::StorageOpen { .. }
            | SessionError::StorageWrite { .. }
            | SessionError::Receive { .. }
            | SessionError::IncompleteTransfer { .. } => Some(Response::new(Status::InternalServerError)),
            SessionError::StorageFinalize { source } | SessionError::BootTarget { source, .. } => {
                Some(Response::failed(source.code()))
            }
        }
    }

    /// Returns true if the failure left a write session to abort
    pub fn aborts_write(&self) -> bool {
        matches!(self, SessionError::StorageWrite { .. } | SessionError::Receive { .. } | SessionError::IncompleteTransfer { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_errors_map_to_status() {
        let error: SessionError = ParseError::too_large_header(1023, 1023).into();
        assert_eq!(error.response(), Some(Response::new(Status::RequestHeaderFieldsTooLarge)));

        let error: SessionError = ParseError::method_not_allowed("PUT").into();
        assert_eq!(error.response(), Some(Response::new(Status::MethodNotAllowed)));

        let error: SessionError = ParseError::length_required("missing").into();
        assert_eq!(error.response(), Some(Response::new(Status::LengthRequired)));
    }

    #[test]
    fn transport_errors_have_no_response() {
        assert!(SessionError::peer_closed().response().is_none());
        let error: SessionError = ParseError::from(io::Error::from(io::ErrorKind::BrokenPipe)).into();
        assert!(error.response().is_none());
    }

    #[test]
    fn finalize_and_boot_errors_carry_code() {
        let error = SessionError::StorageFinalize { source: StorageError::validation("bad magic") };
        assert_eq!(error.response().unwrap().body(), Some("Failed (5379).\n"));

        let error = SessionError::BootTarget { slot: "ota_1".into(), source: StorageError::device(ERR_FAIL, "otadata") };
        let response = error.response().unwrap();
        assert_eq!(response.status(), Status::InternalServerError);
        assert_eq!(response.body(), Some("Failed (-1).\n"));
        assert!(!error.aborts_write());
    }

    #[test]
    fn mid_transfer_errors_abort() {
        let error = SessionError::IncompleteTransfer { remaining: 10 };
        assert!(error.aborts_write());
        assert_eq!(error.response(), Some(Response::new(Status::InternalServerError)));
        assert!(!SessionError::NoUpdateTarget.aborts_write());
        assert_eq!(SessionError::NoUpdateTarget.response(), Some(Response::new(Status::NotImplemented)));
    }
}
