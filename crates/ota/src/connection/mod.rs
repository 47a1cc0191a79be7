//! Session handling for one accepted connection.
//!
//! The [`Receiver`] runs the whole push update exchange over one stream:
//!
//! 1. accumulate the request head in a fixed size buffer
//! 2. classify it as a version query, a cancel or an upload
//! 3. stream the upload into the storage slot, bounded by its declared length
//! 4. finalize the image and mark it bootable
//! 5. write a single status response
//!
//! Every failure is handled inside the session and turned into a status
//! response. The caller only gets the coarse [`SessionOutcome`](crate::protocol::SessionOutcome)
//! or [`SessionError`](crate::protocol::SessionError) back.

mod receiver;

pub use receiver::DEFAULT_BUFFER_SIZE;
pub use receiver::MIN_BUFFER_SIZE;
pub use receiver::Phase;
pub use receiver::Receiver;
pub use receiver::ReceiverConfig;
