//! Errors
//!
//! Custom error types used throughout the `canopy` crate. Every stage of
//! training, encoding and model building reports failures through
//! [`CanopyError`] so callers can check the status after each stage.
use thiserror::Error;

/// Errors that can occur while binning, growing, encoding or building trees.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CanopyError {
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Incorrect parameter value passed for {0}, expected {1} but {2} provided.")]
    IncorrectParameter(String, String, String),
    /// A handle (tree id, node id) that does not refer to anything.
    #[error("Null pointer: {0}")]
    NullPointer(String),
    /// Unable to reserve memory for an arena chunk or a table.
    #[error("Memory allocation failed: {0}")]
    MemoryAllocationFailed(String),
    /// A bulk buffer copy was attempted between buffers of different sizes.
    #[error("Memory copy failed: {0}")]
    MemoryCopyFailed(String),
    /// Unable to write model to file.
    #[error("Unable to write model to file: {0}")]
    UnableToWrite(String),
    /// Unable to read model from file.
    #[error("Unable to read model from a file {0}")]
    UnableToRead(String),
    /// Training was cancelled at a level boundary.
    #[error("Training was cancelled before the tree was complete.")]
    Cancelled,
}

impl CanopyError {
    /// Shorthand for an [`CanopyError::IncorrectParameter`] error.
    pub fn incorrect_parameter(name: &str, expected: impl Into<String>, provided: impl ToString) -> Self {
        CanopyError::IncorrectParameter(name.to_string(), expected.into(), provided.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incorrect_parameter_message() {
        let e = CanopyError::incorrect_parameter("max_bins", "a value of at least 2", 1);
        assert_eq!(
            e.to_string(),
            "Incorrect parameter value passed for max_bins, expected a value of at least 2 but 1 provided."
        );
    }
}
