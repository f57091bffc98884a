//! Error taxonomy for the scan pipeline
//!
//! Provides structured error types for:
//! - Address validation (malformed targets and ranges)
//! - Port scan timeouts, the only stage timeout that escalates
//! - State persistence failures, including corrupted checkpoints
//! - Report output failures
//! - External tool spawn failures and configuration errors

use std::{fmt, path::PathBuf};
use thiserror::Error;

/// Main result type used throughout the application
pub type Result<T> = std::result::Result<T, ScannerError>;

/// Error enum covering every failure the pipeline can surface
#[derive(Error, Debug, Clone)]
pub enum ScannerError {
    /// A target or range failed address-family validation
    #[error("Invalid address: {address} - {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Port scan exceeded its time budget
    #[error("Scan timeout: {stage} on {target} after {duration_secs}s")]
    ScanTimeout {
        stage: String,
        target: String,
        duration_secs: u64,
    },

    /// State file could not be written or read
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Report writer failed
    #[error("Output error: {format} - {message}")]
    Output { format: String, message: String },

    /// External scanning utility could not be started or awaited
    #[error("Tool error: {program} - {message}")]
    Tool { program: String, message: String },

    /// Invalid settings
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Failures of the state store.
///
/// `Corrupted` is the refinement of a persistence failure where the file
/// exists but does not hold a readable checkpoint; callers that only care
/// about "state I/O went wrong" use [`ScannerError::is_persistence`].
#[derive(Error, Debug, Clone)]
pub enum PersistenceError {
    #[error("State I/O error: {operation} {} - {message}", path.display())]
    Io {
        operation: String,
        path: PathBuf,
        message: String,
    },

    #[error("State file corrupted: {} - {message}", path.display())]
    Corrupted { path: PathBuf, message: String },
}

impl ScannerError {
    /// Create an invalid address error
    pub fn invalid_address<A: Into<String>, R: Into<String>>(address: A, reason: R) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a scan timeout error
    pub fn scan_timeout<S: Into<String>, T: Into<String>>(
        stage: S,
        target: T,
        duration_secs: u64,
    ) -> Self {
        Self::ScanTimeout {
            stage: stage.into(),
            target: target.into(),
            duration_secs,
        }
    }

    /// Create a persistence I/O error
    pub fn persistence_io<O, P, M>(operation: O, path: P, message: M) -> Self
    where
        O: Into<String>,
        P: Into<PathBuf>,
        M: Into<String>,
    {
        Self::Persistence(PersistenceError::Io {
            operation: operation.into(),
            path: path.into(),
            message: message.into(),
        })
    }

    /// Create a corrupted state error
    pub fn corrupted_state<P: Into<PathBuf>, M: Into<String>>(path: P, message: M) -> Self {
        Self::Persistence(PersistenceError::Corrupted {
            path: path.into(),
            message: message.into(),
        })
    }

    /// Create an output error
    pub fn output<F: Into<String>, M: Into<String>>(format: F, message: M) -> Self {
        Self::Output {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Create a tool error
    pub fn tool<P: Into<String>, M: Into<String>>(program: P, message: M) -> Self {
        Self::Tool {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// True for every state store failure, corrupted or not
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// True only when the state file exists but cannot be parsed
    pub fn is_corrupted_state(&self) -> bool {
        matches!(self, Self::Persistence(PersistenceError::Corrupted { .. }))
    }

    /// Check if re-running the same target could plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ScanTimeout { .. } | Self::Output { .. })
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Persistence(PersistenceError::Corrupted { .. }) => ErrorSeverity::Critical,
            Self::Persistence(_) | Self::Tool { .. } | Self::Configuration { .. } => {
                ErrorSeverity::High
            }
            Self::ScanTimeout { .. } | Self::Output { .. } => ErrorSeverity::Medium,
            Self::InvalidAddress { .. } => ErrorSeverity::Low,
        }
    }
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<rust_xlsxwriter::XlsxError> for ScannerError {
    fn from(error: rust_xlsxwriter::XlsxError) -> Self {
        Self::output("xlsx", error.to_string())
    }
}
