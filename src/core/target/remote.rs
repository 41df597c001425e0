//! Backend reaching a target over SSH
//!
//! Commands and file transfers share one control session. Every started
//! application gets a session of its own, so its output readers never hold up
//! transfers or other commands.

use super::command::{drain_command, CommandOutput, CommandProcess, ExecOptions, SpawnRequest};
use super::{Credentials, TargetBackend};
use crate::core::application::ProcessIo;
use crate::core::error::{HarnessError, Result};
use crate::core::helper::shell_quote;
use ssh2::{Channel, Session};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Blocking calls on the control session return after this long
const CONTROL_SESSION_TIMEOUT: Duration = Duration::from_secs(1);
/// Blocking calls on application sessions return after this long
const APPLICATION_SESSION_TIMEOUT: Duration = Duration::from_millis(200);
/// Blocking limit while a file transfer runs
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

#[allow(clippy::cast_possible_truncation)]
fn millis(duration: Duration) -> u32 {
    duration.as_millis().min(u128::from(u32::MAX)) as u32
}

/// `cd <cwd> && export K=V ... && exec <command>`
pub fn compose_remote_command(command: &str, cwd: Option<&str>, env: &BTreeMap<String, String>) -> String {
    let mut parts = Vec::new();
    if let Some(cwd) = cwd {
        parts.push(format!("cd {}", shell_quote(cwd)));
    }
    if !env.is_empty() {
        let assignments: Vec<String> = env
            .iter()
            .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
            .collect();
        parts.push(format!("export {}", assignments.join(" ")));
    }
    parts.push(command.to_string());
    parts.join(" && ")
}

/// SFTP client for file operations
pub struct SftpClient {
    sftp: ssh2::Sftp,
}

impl SftpClient {
    /// Create SFTP client from an SSH session
    pub fn new(session: &Session) -> Result<Self> {
        let sftp = session
            .sftp()
            .map_err(|e| HarnessError::Transfer(format!("SFTP init failed: {e}")))?;
        Ok(Self { sftp })
    }

    /// Read a file
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = self
            .sftp
            .open(Path::new(path))
            .map_err(|e| HarnessError::Transfer(format!("Open {path} failed: {e}")))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        Ok(contents)
    }

    /// Write a file
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut file = self
            .sftp
            .create(Path::new(path))
            .map_err(|e| HarnessError::Transfer(format!("Create {path} failed: {e}")))?;
        file.write_all(data)?;
        Ok(())
    }
}

/// Connection parameters of a remote target
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    /// Hostname or IP address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub username: String,
    /// How to authenticate
    pub credentials: Credentials,
}

impl RemoteEndpoint {
    fn open_session(&self, timeout: Duration) -> Result<Session> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| HarnessError::ConnectionFailed(format!("{}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| HarnessError::ConnectionFailed(format!("{}: no address", self.host)))?;
        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| HarnessError::ConnectionFailed(format!("{addr}: {e}")))?;

        let mut session = Session::new()?;
        session.set_timeout(millis(timeout));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| HarnessError::ConnectionFailed(format!("SSH handshake failed: {e}")))?;
        self.authenticate(&session)?;
        Ok(session)
    }

    /// Authenticate with the configured method
    fn authenticate(&self, session: &Session) -> Result<()> {
        match &self.credentials {
            Credentials::Password { password } => {
                session
                    .userauth_password(&self.username, password)
                    .map_err(|e| HarnessError::ConnectionFailed(format!("Password auth failed: {e}")))?;
            }
            Credentials::PrivateKey { path, passphrase } => {
                session
                    .userauth_pubkey_file(&self.username, None, path, passphrase.as_deref())
                    .map_err(|e| HarnessError::ConnectionFailed(format!("Key auth failed: {e}")))?;
            }
            Credentials::Agent => {
                session
                    .userauth_agent(&self.username)
                    .map_err(|e| HarnessError::ConnectionFailed(format!("Agent auth failed: {e}")))?;
            }
        }

        if !session.authenticated() {
            return Err(HarnessError::ConnectionFailed("Authentication failed".to_string()));
        }
        Ok(())
    }
}

/// SSH target access
pub struct RemoteBackend {
    endpoint: RemoteEndpoint,
    session: Option<Session>,
    connect_timeout: Duration,
}

impl RemoteBackend {
    /// Create a backend; nothing is connected yet
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        Self {
            endpoint,
            session: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| HarnessError::NotConnected(self.endpoint.host.clone()))
    }

    fn with_transfer_timeout<T>(&self, f: impl FnOnce(&Session) -> Result<T>) -> Result<T> {
        let session = self.session()?;
        session.set_timeout(millis(TRANSFER_TIMEOUT));
        let result = f(session);
        session.set_timeout(millis(CONTROL_SESSION_TIMEOUT));
        result
    }
}

struct ChannelProcess {
    channel: Channel,
}

impl CommandProcess for ChannelProcess {
    fn poll_exit(&mut self) -> Result<Option<i32>> {
        if !self.channel.eof() {
            return Ok(None);
        }
        match self.channel.wait_close() {
            Ok(()) => Ok(Some(self.channel.exit_status()?)),
            // timed out on the session; the close arrives with a later poll
            Err(e) if e.code() == ssh2::ErrorCode::Session(-9) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn abort(&mut self) {
        if let Err(e) = self.channel.close() {
            debug!("closing channel failed: {}", e);
        }
    }
}

impl TargetBackend for RemoteBackend {
    fn connect(&mut self, timeout: Duration) -> Result<()> {
        let session = self.endpoint.open_session(timeout)?;
        session.set_timeout(millis(CONTROL_SESSION_TIMEOUT));
        session.set_keepalive(true, 30);
        self.connect_timeout = timeout;
        self.session = Some(session);
        info!("connected to {}", self.description());
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "test run finished", None);
        }
    }

    fn execute(&mut self, command: &str, options: &ExecOptions) -> Result<CommandOutput> {
        let session = self.session()?;
        let full_command = compose_remote_command(command, options.cwd.as_deref(), &options.env);
        let mut channel = session.channel_session()?;
        channel.exec(&full_command)?;

        if !options.block {
            return Ok(CommandOutput::default());
        }

        let stdout = channel.stream(0);
        let stderr = channel.stderr();
        drain_command(command, stdout, stderr, options.timeout, &mut ChannelProcess { channel })
    }

    fn spawn(&mut self, request: &SpawnRequest) -> Result<ProcessIo> {
        let session = self.endpoint.open_session(self.connect_timeout)?;
        session.set_timeout(millis(APPLICATION_SESSION_TIMEOUT));

        let command = format!("exec {}", request.command_line);
        let full_command = compose_remote_command(&command, request.working_dir.as_deref(), &request.env);
        let mut channel = session.channel_session()?;
        channel.exec(&full_command)?;
        debug!("started '{}' on {}", full_command, self.endpoint.host);

        Ok(ProcessIo {
            stdin: Box::new(channel.stream(0)),
            stdout: Box::new(channel.stream(0)),
            stderr: Box::new(channel.stderr()),
            pid: None,
        })
    }

    fn terminate(&mut self, _pid: Option<u32>, kill_command: &str) -> Result<()> {
        let output = self.execute(kill_command, &ExecOptions::default().timeout(self.connect_timeout))?;
        if !output.success() {
            warn!("'{}' on {} exited with {:?}", kill_command, self.endpoint.host, output.exit_code);
        }
        Ok(())
    }

    fn copy_from_target(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        let data = self.with_transfer_timeout(|session| SftpClient::new(session)?.read_file(remote_path))?;
        std::fs::write(local_path, data)?;
        Ok(())
    }

    fn copy_to_target(&mut self, local_path: &Path, remote_path: &str) -> Result<()> {
        let data = std::fs::read(local_path)?;
        self.with_transfer_timeout(|session| SftpClient::new(session)?.write_file(remote_path, &data))
    }

    fn description(&self) -> String {
        format!(
            "ssh://{}@{}:{}",
            self.endpoint.username, self.endpoint.host, self.endpoint.port
        )
    }
}
