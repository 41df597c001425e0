//! One-shot commands on a target

use crate::core::buffer::Buffer;
use crate::core::error::{HarnessError, Result};
use crate::core::reader::PipeReader;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const ABORTED_READER_TIMEOUT: Duration = Duration::from_secs(1);

/// How to run a command with [`super::Target::execute_on_target`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Wait for the command and collect its output
    pub block: bool,
    /// Extra environment, on top of the target defaults
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub cwd: Option<String>,
    /// Give up after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            block: true,
            env: BTreeMap::new(),
            cwd: None,
            timeout: None,
        }
    }
}

impl ExecOptions {
    /// Start the command and return at once
    #[must_use]
    pub fn detached() -> Self {
        Self {
            block: false,
            ..Self::default()
        }
    }

    /// Set the timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Stdout lines
    pub stdout: Vec<String>,
    /// Stderr lines
    pub stderr: Vec<String>,
    /// Exit code; `None` for detached or killed commands
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Did the command exit with 0?
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A process to start for an application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Full command line, executable first
    pub command_line: String,
    /// Working directory
    pub working_dir: Option<String>,
    /// Complete environment overrides
    pub env: BTreeMap<String, String>,
}

/// Exit status access for a running command
pub(crate) trait CommandProcess {
    /// Exit code once the command finished, `None` while it runs
    fn poll_exit(&mut self) -> Result<Option<i32>>;

    /// Stop waiting for the command
    fn abort(&mut self);
}

/// Collect output of a running command until it exits or `timeout` elapses
///
/// Both streams are drained on reader threads, so neither can block the
/// other. On timeout the command is aborted and whatever was read so far is
/// dropped in favour of a [`HarnessError::Timeout`].
pub(crate) fn drain_command<O, E>(
    label: &str,
    stdout: O,
    stderr: E,
    timeout: Option<Duration>,
    process: &mut dyn CommandProcess,
) -> Result<CommandOutput>
where
    O: Read + Send + 'static,
    E: Read + Send + 'static,
{
    let stdout_buffer = Arc::new(Buffer::new());
    let stderr_buffer = Arc::new(Buffer::new());
    let mut readers = [
        PipeReader::spawn(format!("{label}-stdout"), stdout, Arc::clone(&stdout_buffer))?,
        PipeReader::spawn(format!("{label}-stderr"), stderr, Arc::clone(&stderr_buffer))?,
    ];

    let start = Instant::now();
    let exit_code = loop {
        if let Some(code) = process.poll_exit()? {
            break code;
        }
        if let Some(limit) = timeout {
            if start.elapsed() >= limit {
                warn!("'{}' did not finish within {:?}, aborting", label, limit);
                process.abort();
                for reader in &mut readers {
                    reader.stop_with_timeout(ABORTED_READER_TIMEOUT);
                }
                return Err(HarnessError::Timeout(limit.as_secs(), label.to_string()));
            }
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    };

    for reader in &mut readers {
        reader.stop();
    }
    debug!("'{}' exited with {}", label, exit_code);
    Ok(CommandOutput {
        stdout: stdout_buffer.get_all_data(),
        stderr: stderr_buffer.get_all_data(),
        exit_code: Some(exit_code),
    })
}
