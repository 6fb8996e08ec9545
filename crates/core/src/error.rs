// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for LingoKit.
//!
//! Errors are categorized by concern so callers can choose a recovery
//! strategy without string matching. All variants carry a descriptive
//! message and convert to/from `String` for boundary code.

use thiserror::Error;

/// Main error type for LingoKit operations.
#[derive(Debug, Error)]
pub enum LingoKitError {
    /// Configuration or parameter validation error.
    ///
    /// Examples:
    /// - Invalid endpoint URI or credentials
    /// - Zero SSRC / clock rate / payload type
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Runtime processing error during normal operation.
    ///
    /// Examples:
    /// - Frame rejected by a downstream writer
    /// - Pipeline state mismatch
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Network-related error (WebSocket transport, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// Codec-specific error (depacketizing, bitstream inconsistency).
    ///
    /// Examples:
    /// - Truncated Opus TOC
    /// - Incomplete VP8 payload descriptor
    #[error("Codec error: {0}")]
    Codec(String),

    /// Container-level error (muxer rejection, malformed WebM stream).
    #[error("Container error: {0}")]
    Container(String),

    /// I/O error (file endpoints, media dumps).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource exhaustion or limit exceeded.
    ///
    /// Examples:
    /// - Buffer pool failed to serve a request
    /// - Writer queue rejected an entry after shutdown
    #[error("Resource exhaustion: {0}")]
    ResourceExhausted(String),
}

/// Convenience type alias for Results using `LingoKitError`.
pub type Result<T> = std::result::Result<T, LingoKitError>;

impl From<LingoKitError> for String {
    fn from(err: LingoKitError) -> Self {
        err.to_string()
    }
}

// Generic string errors default to the Runtime category.
impl From<String> for LingoKitError {
    fn from(s: String) -> Self {
        Self::Runtime(s)
    }
}

impl From<&str> for LingoKitError {
    fn from(s: &str) -> Self {
        Self::Runtime(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LingoKitError::Configuration("Invalid service URI".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid service URI");

        let err = LingoKitError::Container("timestamp is too old".to_string());
        assert_eq!(err.to_string(), "Container error: timestamp is too old");
    }

    #[test]
    fn test_string_conversions() {
        let err: LingoKitError = "Something went wrong".into();
        assert_eq!(err.to_string(), "Runtime error: Something went wrong");

        let s: String = LingoKitError::Network("Connection timeout".to_string()).into();
        assert_eq!(s, "Network error: Connection timeout");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: LingoKitError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("File not found"));
    }
}
