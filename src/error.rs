//! Error types for sonar discovery, control and frame streaming.
//!
//! All errors implement the `std::error::Error` trait and carry structured
//! context for debugging and recovery guidance.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: refused connections, timeouts, resets. The
//!   connection state machine recovers from these on its own.
//! - **Protocol Errors**: malformed beacons, frame packets or command
//!   responses. Dropped where they are detected.
//! - **Contract Violations**: frames whose sample buffer disagrees with the
//!   declared geometry, settings outside the device's operating range.
//! - **Shutdown Errors**: a worker that did not acknowledge a stop request.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use sonarlink::SonarError;
//!
//! let error = SonarError::connection_failed("connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sonar operations.
pub type Result<T, E = SonarError> = std::result::Result<T, E>;

/// Main error type for sonar operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SonarError {
    #[error("Failed to connect to sonar: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Protocol violation in {context}: {details}")]
    Protocol { context: String, details: String },

    #[error("Command rejected with status {status}: {line}")]
    CommandRejected { status: String, line: String },

    #[error("Invalid settings: {reason}")]
    InvalidSettings { reason: String },

    #[error("Frame geometry mismatch: expected {expected} sample bytes, found {actual}")]
    FrameGeometry { expected: usize, actual: usize },

    #[error("Configuration file error: {path}")]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {details}")]
    ConfigFormat { details: String },

    #[error("{subsystem} did not acknowledge shutdown within {duration:?}")]
    ShutdownTimeout { subsystem: String, duration: Duration },

    #[error("{subsystem} is closed")]
    Closed { subsystem: String },

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SonarError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SonarError::Connection { .. } => true,
            SonarError::Timeout { .. } => true,
            SonarError::Closed { .. } => true,
            SonarError::Io { .. } => true,
            SonarError::Parse { .. } => false,
            SonarError::Protocol { .. } => false,
            SonarError::CommandRejected { .. } => false,
            SonarError::InvalidSettings { .. } => false,
            SonarError::FrameGeometry { .. } => false,
            SonarError::Config { .. } => false,
            SonarError::ConfigFormat { .. } => false,
            SonarError::ShutdownTimeout { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SonarError::Connection { .. } => vec![
                "Check that the sonar is powered and on the same network",
                "Verify the device is not busy with another client",
                "Check firewall rules for the command port",
            ],
            SonarError::Timeout { .. } => vec![
                "Increase the configured timeout",
                "Check network link quality to the sonar",
            ],
            SonarError::Closed { .. } => vec![
                "Reconnect to the device",
                "Recreate the subsystem if it was stopped",
            ],
            SonarError::Io { .. } => vec![
                "Check that the local port is not already in use",
                "Verify network interface configuration",
            ],
            SonarError::Parse { .. } => vec![
                "Verify the device firmware is supported",
                "Check for packet corruption on the link",
            ],
            SonarError::Protocol { .. } => vec![
                "Verify the device firmware is supported",
                "Check that only one client is streaming from the device",
            ],
            SonarError::CommandRejected { .. } => vec![
                "Check the command syntax against the device documentation",
                "Verify settings are supported by this system type",
            ],
            SonarError::InvalidSettings { .. } => vec![
                "Check the settings against the device operating ranges",
                "Use a ping mode supported by the system type",
            ],
            SonarError::FrameGeometry { .. } => vec![
                "Check that the sample buffer matches the frame header geometry",
                "Verify the ping mode and samples per beam values",
            ],
            SonarError::Config { .. } => vec![
                "Check the configuration file exists and is readable",
                "Check file permissions",
            ],
            SonarError::ConfigFormat { .. } => vec![
                "Check the configuration values and YAML syntax",
                "Keep the tick interval below the availability timeout",
            ],
            SonarError::ShutdownTimeout { .. } => vec![
                "Inspect logs for a stuck worker task",
                "Restart the application",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        SonarError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SonarError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for parse errors.
    pub fn parse_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        SonarError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for protocol errors.
    pub fn protocol_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        SonarError::Protocol { context: context.into(), details: details.into() }
    }

    /// Helper constructor for invalid settings.
    pub fn invalid_settings(reason: impl Into<String>) -> Self {
        SonarError::InvalidSettings { reason: reason.into() }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io_error(context: impl Into<String>, source: std::io::Error) -> Self {
        SonarError::Io { context: context.into(), source }
    }

    /// Helper constructor for closed subsystems.
    pub fn closed(subsystem: impl Into<String>) -> Self {
        SonarError::Closed { subsystem: subsystem.into() }
    }
}

impl From<std::io::Error> for SonarError {
    fn from(err: std::io::Error) -> Self {
        SonarError::Io { context: "<unknown>".to_string(), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_format_correctly_with_arbitrary_context(
            reason in ".*",
            context in "\\w+",
            details in ".*",
            expected in 0usize..100_000usize,
            actual in 0usize..100_000usize,
            duration_ms in 1u64..60000u64
          ) {
            let connection_msg = SonarError::connection_failed(reason.clone()).to_string();
            prop_assert!(connection_msg.contains(&reason));

            let parse_msg = SonarError::parse_error(context.clone(), details.clone()).to_string();
            prop_assert!(parse_msg.contains(&context));
            prop_assert!(parse_msg.contains(&details));

            let geometry_msg = SonarError::FrameGeometry { expected, actual }.to_string();
            prop_assert!(geometry_msg.contains(&expected.to_string()));
            prop_assert!(geometry_msg.contains(&actual.to_string()));

            let timeout_msg = SonarError::Timeout { duration: Duration::from_millis(duration_ms) }.to_string();
            prop_assert!(!timeout_msg.is_empty());
          }

          #[test]
          fn error_source_chaining_preserves_information(
            base_message in ".*",
            reasons in prop::collection::vec(".*", 1..5)
          ) {
            let mut current: Box<dyn std::error::Error + Send + Sync> =
              Box::new(std::io::Error::other(base_message.clone()));
            for (i, reason) in reasons.iter().enumerate() {
              current = Box::new(SonarError::connection_failed_with_source(
                format!("Level {}: {}", i, reason),
                current,
              ));
            }

            let mut depth = 0;
            let mut found_base = false;
            let mut source = std::error::Error::source(current.as_ref());
            while let Some(err) = source {
              depth += 1;
              if err.to_string().contains(&base_message) {
                found_base = true;
              }
              source = std::error::Error::source(err);
              if depth > 10 {
                break;
              }
            }

            prop_assert_eq!(depth, reasons.len());
            prop_assert!(found_base, "Base message '{}' not found in chain", base_message);
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        // Compile-time check: SonarError must be Send + Sync + 'static
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<SonarError>();

        let error = SonarError::connection_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn transport_errors_are_retryable_contract_violations_are_not() {
        assert!(SonarError::connection_failed("refused").is_retryable());
        assert!(SonarError::Timeout { duration: Duration::from_secs(1) }.is_retryable());
        assert!(SonarError::closed("command channel").is_retryable());
        assert!(!SonarError::FrameGeometry { expected: 10, actual: 9 }.is_retryable());
        assert!(!SonarError::invalid_settings("frame rate").is_retryable());
        assert!(
            !SonarError::ShutdownTimeout {
                subsystem: "machine".to_string(),
                duration: Duration::from_secs(2)
            }
            .is_retryable()
        );
    }

    #[test]
    fn recovery_suggestions_are_descriptive() {
        let errors = [
            SonarError::connection_failed("test"),
            SonarError::protocol_error("frame packet", "bad signature"),
            SonarError::CommandRejected { status: "400".to_string(), line: "400 Bad".to_string() },
        ];
        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }
    }

    #[test]
    fn from_io_error_keeps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err: SonarError = io_err.into();
        match err {
            SonarError::Io { source, .. } => assert_eq!(source.to_string(), "port taken"),
            _ => panic!("Expected Io error variant"),
        }
    }
}
