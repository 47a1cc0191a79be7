use crate::protocol::{Response, Status};
use crate::storage::Slot;

/// The successful end of a receive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The image was written, finalized and marked as the next boot slot.
    Updated { slot: Slot },
    /// The peer cancelled the update before any write began.
    Cancelled,
    /// The peer queried the running firmware version.
    VersionReported { version: String },
}

impl SessionOutcome {
    /// Returns true if the embedding system may restart the device now.
    ///
    /// Restarting after a version query would only reboot into the same image,
    /// so that case is not reported as restart safe.
    pub fn is_restart_safe(&self) -> bool {
        matches!(self, SessionOutcome::Updated { .. } | SessionOutcome::Cancelled)
    }

    pub fn response(&self) -> Response {
        match self {
            SessionOutcome::Updated { slot } => Response::next_boot(slot.label()),
            SessionOutcome::Cancelled => Response::new(Status::NoContent),
            SessionOutcome::VersionReported { version } => Response::version(version),
        }
    }
}
