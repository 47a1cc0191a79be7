use std::fmt;

/// Status lines the receiver can answer with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    NoContent,
    MethodNotAllowed,
    LengthRequired,
    RequestHeaderFieldsTooLarge,
    InternalServerError,
    NotImplemented,
}

impl Status {
    /// The numeric status code
    pub const fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NoContent => 204,
            Status::MethodNotAllowed => 405,
            Status::LengthRequired => 411,
            Status::RequestHeaderFieldsTooLarge => 431,
            Status::InternalServerError => 500,
            Status::NotImplemented => 501,
        }
    }

    /// The status line as written after the protocol version, e.g. `"411 Length Required"`
    pub const fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "200 OK",
            Status::NoContent => "204 No Content",
            Status::MethodNotAllowed => "405 Method Not Allowed",
            Status::LengthRequired => "411 Length Required",
            Status::RequestHeaderFieldsTooLarge => "431 Request Header Fields Too Large",
            Status::InternalServerError => "500 Internal Server Error",
            Status::NotImplemented => "501 Not Implemented",
        }
    }

    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Status::Ok | Status::NoContent)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single status response written back at the end of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: Status,
    body: Option<String>,
}

impl Response {
    pub fn new(status: Status) -> Self {
        Self { status, body: None }
    }

    pub fn with_body<S: Into<String>>(status: Status, body: S) -> Self {
        Self { status, body: Some(body.into()) }
    }

    /// `200 OK` naming the slot that will boot next
    pub fn next_boot(label: &str) -> Self {
        Self::with_body(Status::Ok, format!("Next boot partition: {label}\n"))
    }

    /// `200 OK` carrying the running firmware version
    pub fn version(version: &str) -> Self {
        Self::with_body(Status::Ok, format!("Version: {version}\n"))
    }

    /// `500 Internal Server Error` carrying a storage error code
    pub fn failed(code: i32) -> Self {
        Self::with_body(Status::InternalServerError, format!("Failed ({code}).\n"))
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

impl From<Status> for Response {
    fn from(status: Status) -> Self {
        Self::new(status)
    }
}
