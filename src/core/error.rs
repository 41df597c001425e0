//! Error types shared by the harness

use super::power::PowerError;
use thiserror::Error;

/// Harness error types
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target name does not match `[\w-]+`
    #[error("Invalid target name: '{0}'")]
    InvalidTargetName(String),

    /// Unknown target
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation needs a connected target
    #[error("Target '{0}' is not connected")]
    NotConnected(String),

    /// SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// File transfer failed
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Power relay error
    #[error("Power device error: {0}")]
    Power(#[from] PowerError),

    /// Operation timed out
    #[error("Timeout after {0} seconds: {1}")]
    Timeout(u64, String),

    /// A test check failed
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// A test decided not to run
    #[error("Test skipped: {0}")]
    Skipped(String),
}

impl HarnessError {
    /// Build an assertion failure
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }

    /// Build a skip notice
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    /// Is this a test-ending assertion (as opposed to an infrastructure error)?
    pub fn is_assertion(&self) -> bool {
        matches!(self, Self::Assertion(_))
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, HarnessError>;
