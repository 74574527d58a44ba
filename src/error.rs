//! Error types for bus monitoring.
//!
//! ## Error Categories
//!
//! - **Connection Errors**: binding, sending or receiving on the bus interface
//! - **Discovery Errors**: missing or down interfaces
//! - **Configuration Errors**: unreadable or malformed configuration files
//! - **Validation Errors**: malformed operator input, see [`ValidationError`]
//!
//! Bus-side error frames are not errors in this sense: they arrive as
//! [`Frame`](crate::Frame)s of kind [`FrameKind::Error`](crate::FrameKind::Error).
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use canscope::BusError;
//!
//! let error = BusError::connection_failed("vcan0", "socket closed");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bus operations.
pub type Result<T, E = BusError> = std::result::Result<T, E>;

/// Main error type for bus operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BusError {
    #[error("Failed to connect to {interface}: {reason}")]
    Connection {
        interface: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Interface {interface} does not exist")]
    InterfaceNotFound { interface: String },

    #[error("Interface {interface} is not up")]
    InterfaceDown { interface: String },

    #[error("Receive failed on {interface}")]
    Receive {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Send failed on {interface}")]
    Send {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error in {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Bus {interface} is closed")]
    Closed { interface: String },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl BusError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            BusError::Connection { .. } => true,
            BusError::Receive { .. } => true,
            BusError::Send { .. } => true,
            BusError::InterfaceDown { .. } => true,
            BusError::Io(_) => true,
            BusError::InterfaceNotFound { .. } => false,
            BusError::Config { .. } => false,
            BusError::Parse { .. } => false,
            BusError::Closed { .. } => false,
            BusError::UnsupportedPlatform { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            BusError::Connection { .. } | BusError::Receive { .. } | BusError::Send { .. } => vec![
                "Check the interface with `ip -details link show`",
                "Bring the interface up with `sudo ip link set up <interface>`",
                "Verify the bus is terminated and the bitrate matches",
            ],
            BusError::InterfaceNotFound { .. } => vec![
                "Load the virtual CAN driver with `sudo modprobe vcan`",
                "Create an interface with `sudo ip link add dev vcan0 type vcan`",
                "List available interfaces with `ip link show type can`",
            ],
            BusError::InterfaceDown { .. } => vec![
                "Bring the interface up with `sudo ip link set up <interface>`",
                "Check the controller state for bus-off",
            ],
            BusError::Config { .. } => vec![
                "Check the configuration file exists and is readable",
                "Validate the YAML syntax and field names",
            ],
            BusError::Parse { .. } => vec![
                "Check the output format of the `ip` tool",
                "Update iproute2 if the output layout changed",
            ],
            BusError::Closed { .. } => vec!["Reconnect the monitor to the interface"],
            BusError::UnsupportedPlatform { .. } => vec![
                "Use the loopback bus for testing on this platform",
                "Build on Linux with the `socketcan` feature",
            ],
            BusError::Io(_) => vec!["Check system resources and permissions"],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(interface: impl Into<String>, reason: impl Into<String>) -> Self {
        BusError::Connection { interface: interface.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        interface: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        BusError::Connection {
            interface: interface.into(),
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Helper constructor for parse errors.
    pub fn parse_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        BusError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for unsupported platform errors.
    pub fn unsupported_platform(
        feature: impl Into<String>,
        required_platform: impl Into<String>,
    ) -> Self {
        BusError::UnsupportedPlatform {
            feature: feature.into(),
            required_platform: required_platform.into(),
        }
    }
}

/// Rejected operator input.
///
/// These never reach the log: the caller drops the edit or skips the send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("'{input}' is not a hexadecimal {field}")]
    InvalidHex { field: &'static str, input: String },

    #[error("identifier {id:#X} exceeds format limit {limit:#X}")]
    IdOutOfRange { id: u32, limit: u32 },

    #[error("length '{input}' is not an integer between 0 and 8")]
    InvalidLength { input: String },

    #[error("data byte {index} '{input}' is not two hex digits")]
    InvalidByte { index: usize, input: String },

    #[error("payload of {len} bytes exceeds 8")]
    PayloadTooLong { len: usize },

    #[error("period '{input}' is not a positive number of milliseconds")]
    InvalidPeriod { input: String },

    #[error("filter start {start:#X} is above end {end:#X}")]
    InvertedRange { start: u32, end: u32 },
}

/// Failure of an operator command.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CommandError {
    /// The form input was rejected; nothing was applied
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Bus(#[from] BusError),
}
