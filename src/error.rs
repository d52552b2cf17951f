use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Json(serde_json::Error),
    Io(std::io::Error),
    /// Credentials missing or incomplete. Requires a new `initialize`.
    Config(String),
    /// Authentication rejected by the cloud. Non-fatal failures leave the
    /// session usable for a later retry.
    Session { message: String, fatal: bool },
    /// An authentication attempt was made within the guard interval.
    AuthThrottled { retry_in: Duration },
    Discovery(String),
    Command { device_id: String, message: String },
    UnsupportedDevice { device_id: String, kind: String },
    UnknownCapability(String),
}

impl Error {
    /// True for failures that may succeed on a later attempt without new credentials.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::AuthThrottled { .. } | Error::Discovery(_) => true,
            Error::Session { fatal, .. } => !fatal,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Session { message, .. } => write!(f, "session error: {message}"),
            Error::AuthThrottled { retry_in } => {
                write!(f, "authentication throttled, retry in {}s", retry_in.as_secs())
            }
            Error::Discovery(msg) => write!(f, "discovery error: {msg}"),
            Error::Command { device_id, message } => {
                write!(f, "command error for {device_id}: {message}")
            }
            Error::UnsupportedDevice { device_id, kind } => {
                write!(f, "unsupported device {device_id} ({kind})")
            }
            Error::UnknownCapability(name) => write!(f, "unknown capability: {name}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
