use std::fmt;

/// Errors produced by the codec core.
///
/// Mirrors the kinds distinguished by the original C implementation's ad hoc
/// error paths (`perror`, `assert`, bad `malloc`), but as a single typed
/// enum so callers can match on failure class instead of parsing messages.
#[derive(Debug)]
pub enum NdzError {
    Io(std::io::Error),
    Format(String),
    Integrity(String),
    Resource(String),
    Assertion(&'static str),
}

impl From<std::io::Error> for NdzError {
    fn from(err: std::io::Error) -> NdzError {
        NdzError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, NdzError>;

impl fmt::Display for NdzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NdzError::Io(e) => write!(f, "io error: {e}"),
            NdzError::Format(msg) => write!(f, "format error: {msg}"),
            NdzError::Integrity(msg) => write!(f, "integrity error: {msg}"),
            NdzError::Resource(msg) => write!(f, "resource error: {msg}"),
            NdzError::Assertion(msg) => write!(f, "internal assertion failed: {msg}"),
        }
    }
}

impl std::error::Error for NdzError {}
