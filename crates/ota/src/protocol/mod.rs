//! Protocol types of the push update exchange.
//!
//! - [`Method`] and [`RequestHead`]: what the receiver extracts from the header region
//! - [`Status`] and [`Response`]: the single status line written back
//! - [`PayloadItem`]: chunks produced while streaming the image
//! - [`SessionOutcome`]: how a session ended successfully
//! - [`ParseError`], [`StorageError`] and [`SessionError`]: the failure taxonomy

mod message;
pub use message::PayloadItem;

mod method;
pub use method::Method;

mod request;
pub use request::ContentLength;
pub use request::RequestHead;

mod response;
pub use response::Response;
pub use response::Status;

mod outcome;
pub use outcome::SessionOutcome;

mod error;
pub use error::ParseError;
pub use error::SessionError;
pub use error::StorageError;
pub use error::{ERR_FAIL, ERR_INVALID_ARG, ERR_INVALID_SIZE, ERR_INVALID_STATE, ERR_VALIDATE_FAILED};
