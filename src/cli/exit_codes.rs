//! CLI Exit Codes
//!
//! Exit codes of `harness-cli`, shared with the CI scripts calling it.

use crate::core::HarnessError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// Violations or failures found
    pub const FAILURE: u8 = 1;

    /// Setup or argument error
    pub const SETUP_ERROR: u8 = 2;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure exiting with 1
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::FAILURE, msg.into())
    }

    /// Setup error exiting with 2
    pub fn setup_error(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::SETUP_ERROR, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) => Some(msg),
            Self::Error(_, msg) => Some(msg),
            _ => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<HarnessError> for CliResult {
    fn from(err: HarnessError) -> Self {
        let code = match err {
            HarnessError::Config(_)
            | HarnessError::InvalidTargetName(_)
            | HarnessError::UnknownTarget(_) => ExitCodes::SETUP_ERROR,
            _ => ExitCodes::FAILURE,
        };
        Self::Error(code, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "Violations or failures found",
        2 => "Setup or argument error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [ExitCodes::SUCCESS, ExitCodes::FAILURE, ExitCodes::SETUP_ERROR] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::failure("2 finding(s)");
        assert!(!error.is_success());
        assert_eq!(error.code(), 1);
        assert_eq!(error.message(), Some("2 finding(s)"));
    }

    #[test]
    fn test_from_harness_error() {
        let result = CliResult::from(HarnessError::UnknownTarget("board-9".to_string()));
        assert_eq!(result.code(), ExitCodes::SETUP_ERROR);

        let result = CliResult::from(HarnessError::assertion("images differ"));
        assert_eq!(result.code(), ExitCodes::FAILURE);
        assert_eq!(result.message(), Some("Assertion failed: images differ"));
    }

    #[test]
    fn test_unreadable_config_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = HarnessConfig::read(Some(&dir.path().join("harness.toml"))).unwrap_err();
        assert_eq!(CliResult::from(err).code(), ExitCodes::SETUP_ERROR);
    }
}
