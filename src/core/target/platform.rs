//! Target platforms and capability flags
//!
//! Platform differences (how to kill, shut down, list processes) live in
//! [`PlatformKind`]; optional target features are [`Capability`] flags.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Operating system family of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// POSIX shell and tools
    #[default]
    Linux,
    /// Windows with a POSIX-compatible shell (Cygwin)
    Windows,
}

impl PlatformKind {
    /// Command that force-kills every process named `application`
    pub fn kill_command(&self, application: &str) -> String {
        match self {
            Self::Linux => format!("killall -9 {application}"),
            Self::Windows => format!("taskkill /F /IM {application}.exe"),
        }
    }

    /// Command that powers the machine down
    pub fn shutdown_command(&self) -> &'static str {
        match self {
            Self::Linux => "shutdown -h now",
            Self::Windows => "shutdown /s /t 0",
        }
    }

    /// Command listing all processes, one per line
    pub fn process_list_command(&self) -> &'static str {
        match self {
            Self::Linux => "ps aux",
            Self::Windows => "tasklist",
        }
    }

    /// Command deleting files matching `pattern` in `directory`
    pub fn delete_files_command(&self, directory: &str, pattern: &str) -> String {
        format!("rm -f {directory}/{pattern}")
    }
}

/// Optional target feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Wayland embedded compositing
    EmbeddedCompositing,
    /// Control of the system compositor (screenshots of the whole screen)
    SystemCompositorControl,
    /// DLT logging
    Dlt,
    /// Offline shader compiler
    BinaryShaderCompiler,
    /// `ltrace` available
    Ltrace,
}

/// Capabilities of one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    capabilities: HashSet<Capability>,
}

impl CapabilitySet {
    /// Check if a capability is present
    pub fn supports(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }
}

/// Screenshot tolerances a target needs at least
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Share of wrong pixels always allowed on this target
    pub wrong_pixels_allowed: f64,
    /// Per-channel difference always allowed on this target
    pub rgb_difference_allowed: f64,
}
