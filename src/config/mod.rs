//! Configuration module
//!
//! Handles the harness configuration file

mod settings;

pub use settings::{ConfigFinding, HarnessConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

/// File name of the configuration
pub const CONFIG_FILE_NAME: &str = "harness.toml";

/// Get the harness configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "remote-test-harness", "RemoteTestHarness")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// `harness.toml` in the configuration directory
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}
