//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Channel data does not fit into one DMX universe
    #[error("Invalid channel count: {actual} (at most {expected})")]
    InvalidChannelCount { expected: usize, actual: usize },

    /// Unrecognised timer granularity name
    #[error("Unknown timer granularity: {0}")]
    UnknownGranularity(String),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::InvalidChannelCount {
            expected: 512,
            actual: 600,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid channel count"));
        assert!(msg.contains("600"));
        assert!(msg.contains("512"));
    }

    #[test]
    fn test_unknown_granularity_error() {
        let err = ProtocolError::UnknownGranularity("fine".to_string());
        assert_eq!(format!("{}", err), "Unknown timer granularity: fine");
    }
}
