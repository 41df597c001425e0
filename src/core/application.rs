//! Applications started on a target
//!
//! An [`Application`] owns the stdin of a spawned process and two line
//! buffers filled from its stdout and stderr. Test code talks to the process
//! through ramsh commands written to stdin and waits for responses with
//! watches on the stdout buffer.

use super::buffer::{Buffer, BufferWatcher, WatchId};
use super::error::Result;
use super::reader::PipeReader;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Raw handles of a spawned process, as produced by a target backend
pub struct ProcessIo {
    /// Process stdin
    pub stdin: Box<dyn Write + Send>,
    /// Process stdout
    pub stdout: Box<dyn Read + Send>,
    /// Process stderr
    pub stderr: Box<dyn Read + Send>,
    /// Process id, when the backend knows it
    pub pid: Option<u32>,
}

impl fmt::Debug for ProcessIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessIo").field("pid", &self.pid).finish_non_exhaustive()
    }
}

/// A process started on a target
pub struct Application {
    name: String,
    extended_name: String,
    stdin: Option<Box<dyn Write + Send>>,
    stdout: BufferWatcher,
    stderr: BufferWatcher,
    readers: Vec<PipeReader>,
    pid: Option<u32>,
    started: bool,
    initialised: bool,
    initialisation_message: Option<String>,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("extended_name", &self.extended_name)
            .field("pid", &self.pid)
            .field("started", &self.started)
            .field("initialised", &self.initialised)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// An application that failed to start
    ///
    /// Launch failures are reported through this value instead of an error;
    /// callers check [`Application::is_started`].
    pub fn not_started(name: &str, name_extension: &str) -> Self {
        let extended_name = format!("{name}{name_extension}");
        Self {
            stdout: BufferWatcher::new(format!("{extended_name} stdout"), Arc::new(Buffer::new())),
            stderr: BufferWatcher::new(format!("{extended_name} stderr"), Arc::new(Buffer::new())),
            name: name.to_string(),
            extended_name,
            stdin: None,
            readers: Vec::new(),
            pid: None,
            started: false,
            initialised: false,
            initialisation_message: None,
        }
    }

    /// Wrap a spawned process and start draining its output
    pub fn launch(name: &str, name_extension: &str, io: ProcessIo) -> Result<Self> {
        let mut app = Self::not_started(name, name_extension);
        let ProcessIo { stdin, stdout, stderr, pid } = io;

        app.readers.push(PipeReader::spawn(
            format!("{}-stdout", app.extended_name),
            stdout,
            Arc::clone(app.stdout.buffer()),
        )?);
        app.readers.push(PipeReader::spawn(
            format!("{}-stderr", app.extended_name),
            stderr,
            Arc::clone(app.stderr.buffer()),
        )?);

        app.stdin = Some(stdin);
        app.pid = pid;
        app.started = true;
        debug!(application = %app.extended_name, ?pid, "application launched");
        Ok(app)
    }

    /// Executable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name including the extension that tells instances apart
    pub fn extended_name(&self) -> &str {
        &self.extended_name
    }

    /// Process id, if known
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Was the process started and not yet killed?
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Was the initialisation message seen?
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Message that marks the application as initialised
    pub fn initialisation_message_to_look_for(&mut self, message: impl Into<String>) {
        self.initialisation_message = Some(message.into());
    }

    /// The configured initialisation message
    pub fn initialisation_message(&self) -> Option<&str> {
        self.initialisation_message.as_deref()
    }

    /// Wait for the initialisation message, searching stdout from the start
    ///
    /// Without a configured message the application counts as initialised as
    /// soon as it was started.
    pub fn wait_for_initialisation(&mut self, timeout: Duration) -> bool {
        if !self.started {
            error!(application = %self.extended_name, "cannot wait for initialisation, application was not started");
            return false;
        }
        if self.initialised {
            return true;
        }
        self.initialised = match self.initialisation_message.clone() {
            Some(message) => self.wait_for_msg_in_stdout_from_beginning(&message, Some(timeout)),
            None => true,
        };
        self.initialised
    }

    /// Write one line to the process stdin
    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "application stdin is closed")
        })?;
        stdin.write_all(line.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    /// Send a ramsh command, optionally waiting for a response line
    ///
    /// The watch is started before the command is written, so a fast response
    /// cannot be missed. Without `response_message` the call returns as soon
    /// as the command was written.
    pub fn send_ramsh_command(
        &mut self,
        command: &str,
        response_message: Option<&str>,
        timeout: Option<Duration>,
    ) -> bool {
        if !self.started {
            error!(application = %self.extended_name, "cannot send '{}', application was not started", command);
            return false;
        }

        let watch = self.stdout.start_watch();
        info!(application = %self.extended_name, "ramsh: {}", command);
        if let Err(e) = self.write_line(command) {
            error!(application = %self.extended_name, "failed to send '{}': {}", command, e);
            self.stdout.remove_watch(watch);
            return false;
        }

        match response_message {
            Some(response) => {
                let found = self.stdout.wait_for_msg(Some(watch), Some(response), timeout);
                if !found {
                    warn!(application = %self.extended_name, "no '{}' after '{}'", response, command);
                }
                found
            }
            None => {
                self.stdout.remove_watch(watch);
                true
            }
        }
    }

    /// Start a watch at the current end of stdout
    pub fn start_watch_stdout(&self) -> WatchId {
        self.stdout.start_watch()
    }

    /// Start a watch at the current end of stderr
    pub fn start_watch_stderr(&self) -> WatchId {
        self.stderr.start_watch()
    }

    /// Wait for `msg` on stdout, see [`BufferWatcher::wait_for_msg`]
    pub fn wait_for_msg_in_stdout(&self, watch: Option<WatchId>, msg: &str, timeout: Option<Duration>) -> bool {
        self.stdout.wait_for_msg(watch, Some(msg), timeout)
    }

    /// Wait for `msg` on stderr, see [`BufferWatcher::wait_for_msg`]
    pub fn wait_for_msg_in_stderr(&self, watch: Option<WatchId>, msg: &str, timeout: Option<Duration>) -> bool {
        self.stderr.wait_for_msg(watch, Some(msg), timeout)
    }

    /// Wait for `msg` anywhere in stdout, including lines printed earlier
    pub fn wait_for_msg_in_stdout_from_beginning(&self, msg: &str, timeout: Option<Duration>) -> bool {
        let watch = self.stdout.get_watch_from_beginning();
        self.stdout.wait_for_msg(Some(watch), Some(msg), timeout)
    }

    /// All stdout lines so far
    pub fn get_stdout_data(&self) -> Vec<String> {
        self.stdout.buffer().get_all_data()
    }

    /// All stderr lines so far
    pub fn get_stderr_data(&self) -> Vec<String> {
        self.stderr.buffer().get_all_data()
    }

    /// Stop the output readers; false if one had to be abandoned
    pub fn stop_readers(&mut self) -> bool {
        let mut all_stopped = true;
        for reader in &mut self.readers {
            all_stopped &= reader.stop();
        }
        self.readers.clear();
        all_stopped
    }

    /// Mark the process as gone: close stdin and drain the remaining output
    pub(crate) fn mark_stopped(&mut self) {
        self.started = false;
        self.stdin = None;
        if !self.stop_readers() {
            error!(application = %self.extended_name, "output of application may be incomplete");
        }
    }
}
