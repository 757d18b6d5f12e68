//! Error types for testframework

use std::io;
use thiserror::Error;

/// Result type alias for testframework operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for testframework
#[derive(Error, Debug)]
pub enum Error {
    /// A selection token named nothing in the test hierarchy, or could not be parsed.
    #[error("Selection error: {0}")]
    Selection(String),

    /// Suite manifest error, unresolved requirement, or unusable output directory.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A test was added under a name that is already taken.
    #[error("Test already exists: {0}")]
    DuplicateTest(String),

    /// Test process could not be spawned or supervised.
    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    /// The run was interrupted from the terminal.
    #[error("Interrupted")]
    Interrupted,

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Other error with custom message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Selection("No such test foo (from user input)".to_string());
        assert_eq!(
            err.to_string(),
            "Selection error: No such test foo (from user input)"
        );
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "custom error".into();
        assert_eq!(err.to_string(), "custom error");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_duplicate_test_display() {
        let err = Error::DuplicateTest("unit.alloc".to_string());
        assert_eq!(err.to_string(), "Test already exists: unit.alloc");
    }
}
