//! Backend running everything on the test host

use super::command::{drain_command, CommandOutput, CommandProcess, ExecOptions, SpawnRequest};
use super::TargetBackend;
use crate::core::application::ProcessIo;
use crate::core::error::{HarnessError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

/// Processes and files of the local machine
#[derive(Debug, Default)]
pub struct LocalBackend {
    applications: HashMap<u32, Child>,
    detached: Vec<Child>,
}

impl LocalBackend {
    /// Create a backend with no running processes
    pub fn new() -> Self {
        Self::default()
    }

    fn shell(command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }

    fn reap_detached(&mut self) {
        self.detached.retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
    }
}

struct LocalProcess<'a>(&'a mut Child);

impl CommandProcess for LocalProcess<'_> {
    fn poll_exit(&mut self) -> Result<Option<i32>> {
        Ok(self.0.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    fn abort(&mut self) {
        if let Err(e) = self.0.kill() {
            debug!("kill of local command failed: {}", e);
        }
        let _ = self.0.wait();
    }
}

fn missing_pipe(name: &str) -> HarnessError {
    HarnessError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("{name} of local process not available"),
    ))
}

impl TargetBackend for LocalBackend {
    fn connect(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) {
        for (pid, mut child) in self.applications.drain() {
            if let Ok(None) = child.try_wait() {
                warn!("local application {} still running, killing it", pid);
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        self.reap_detached();
    }

    fn execute(&mut self, command: &str, options: &ExecOptions) -> Result<CommandOutput> {
        let mut cmd = Self::shell(command);
        cmd.envs(&options.env);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        if !options.block {
            let child = cmd
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()?;
            self.detached.push(child);
            self.reap_detached();
            return Ok(CommandOutput::default());
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        drain_command(command, stdout, stderr, options.timeout, &mut LocalProcess(&mut child))
    }

    fn spawn(&mut self, request: &SpawnRequest) -> Result<ProcessIo> {
        let mut cmd = Self::shell(&format!("exec {}", request.command_line));
        cmd.envs(&request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let pid = child.id();
        self.applications.insert(pid, child);

        Ok(ProcessIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            pid: Some(pid),
        })
    }

    fn terminate(&mut self, pid: Option<u32>, kill_command: &str) -> Result<()> {
        if let Some(mut child) = pid.and_then(|pid| self.applications.remove(&pid)) {
            if let Err(e) = child.kill() {
                debug!("local process already gone: {}", e);
            }
            child.wait()?;
            return Ok(());
        }

        let output = self.execute(kill_command, &ExecOptions::default())?;
        if !output.success() {
            debug!("'{}' exited with {:?}", kill_command, output.exit_code);
        }
        Ok(())
    }

    fn copy_from_target(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        fs::copy(remote_path, local_path)
            .map_err(|e| HarnessError::Transfer(format!("{} -> {}: {}", remote_path, local_path.display(), e)))?;
        Ok(())
    }

    fn copy_to_target(&mut self, local_path: &Path, remote_path: &str) -> Result<()> {
        fs::copy(local_path, remote_path)
            .map_err(|e| HarnessError::Transfer(format!("{} -> {}: {}", local_path.display(), remote_path, e)))?;
        Ok(())
    }

    fn description(&self) -> String {
        "local".to_string()
    }
}
