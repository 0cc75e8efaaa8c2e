//! Crate-wide error type.
use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// A page record could not be read back whole, or a header looked corrupt.
    Storage(String),
    /// `remove`/`modify` was asked for a key that is not present.
    NotFound,
    /// `insert` was asked to add a key that already exists.
    DuplicateKey,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error. {}", e),
            Error::Storage(msg) => write!(f, "Storage error. {}", msg),
            Error::NotFound => write!(f, "Key not found."),
            Error::DuplicateKey => write!(f, "Key already exists."),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}
