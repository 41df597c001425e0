//! NETIO power relay over telnet
//!
//! The relay speaks KSHELL: a greeting line, then `login`, `port <n> <0|1>`
//! and `quit`, each acknowledged with a line starting with `250`.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

// Telnet protocol constants
const IAC: u8 = 255; // Interpret As Command
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250; // Subnegotiation Begin
const SE: u8 = 240; // Subnegotiation End

/// KSHELL success code
const RESPONSE_OK: &str = "250";

/// Default KSHELL port
pub const DEFAULT_RELAY_PORT: u16 = 1234;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Power relay errors
#[derive(Error, Debug)]
pub enum PowerError {
    /// TCP connection failed
    #[error("Connection to {0} failed: {1}")]
    ConnectionFailed(String, String),

    /// No response within the timeout
    #[error("No response within {0} seconds")]
    Timeout(u64),

    /// The relay answered something other than 250
    #[error("'{command}' rejected: {response}")]
    Rejected {
        /// Command sent (password masked)
        command: String,
        /// Response line
        response: String,
    },

    /// The relay closed the connection
    #[error("Relay closed the connection")]
    Disconnected,

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One configured power relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerDeviceConfig {
    /// Name targets refer to
    pub name: String,
    /// Relay host
    pub host: String,
    /// KSHELL port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user
    pub username: String,
    /// Login password
    #[serde(default)]
    pub password: String,
}

fn default_port() -> u16 {
    DEFAULT_RELAY_PORT
}

/// Splits telnet input into text lines, dropping IAC sequences
///
/// Incomplete sequences and unterminated lines are kept until the next
/// [`TelnetLineDecoder::feed`].
#[derive(Debug, Default)]
pub struct TelnetLineDecoder {
    pending: BytesMut,
    text: Vec<u8>,
}

impl TelnetLineDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add received bytes, return every completed line
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(data);
        self.strip_commands();

        let mut lines = Vec::new();
        while let Some(pos) = self.text.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.text.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim_end_matches(['\r', '\n']).to_string();
            lines.push(line);
        }
        lines
    }

    fn strip_commands(&mut self) {
        while !self.pending.is_empty() {
            let data = &self.pending[..];
            if data[0] != IAC {
                let end = data.iter().position(|b| *b == IAC).unwrap_or(data.len());
                self.text.extend_from_slice(&data[..end]);
                self.pending.advance(end);
                continue;
            }
            if data.len() < 2 {
                // Incomplete command, wait for more
                return;
            }
            match data[1] {
                IAC => {
                    // Escaped IAC (255 255 -> 255)
                    self.text.push(IAC);
                    self.pending.advance(2);
                }
                DO | DONT | WILL | WONT => {
                    if data.len() < 3 {
                        return;
                    }
                    self.pending.advance(3);
                }
                SB => {
                    let Some(end) = data[2..].windows(2).position(|w| w == [IAC, SE]) else {
                        return;
                    };
                    self.pending.advance(end + 4);
                }
                _ => self.pending.advance(2),
            }
        }
    }
}

/// An open KSHELL session
struct RelaySession {
    stream: TcpStream,
    decoder: TelnetLineDecoder,
    lines: Vec<String>,
}

impl RelaySession {
    async fn open(host: &str, port: u16) -> Result<Self, PowerError> {
        let addr = format!("{host}:{port}");
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| PowerError::Timeout(CONNECT_TIMEOUT.as_secs()))?
            .map_err(|e| PowerError::ConnectionFailed(addr.clone(), e.to_string()))?;
        stream.set_nodelay(true)?;

        let mut session = Self {
            stream,
            decoder: TelnetLineDecoder::new(),
            lines: Vec::new(),
        };
        let greeting = session.next_line().await?;
        debug!("relay {} greeting: {}", addr, greeting);
        Ok(session)
    }

    async fn next_line(&mut self) -> Result<String, PowerError> {
        loop {
            if !self.lines.is_empty() {
                let line = self.lines.remove(0);
                if line.trim().is_empty() {
                    continue;
                }
                return Ok(line);
            }

            let mut buf = [0u8; 512];
            let n = tokio::time::timeout(RESPONSE_TIMEOUT, self.stream.read(&mut buf))
                .await
                .map_err(|_| PowerError::Timeout(RESPONSE_TIMEOUT.as_secs()))??;
            if n == 0 {
                return Err(PowerError::Disconnected);
            }
            self.lines.extend(self.decoder.feed(&buf[..n]));
        }
    }

    /// Send a command and require a 250 response; `shown` is what gets logged
    async fn command(&mut self, command: &str, shown: &str) -> Result<String, PowerError> {
        self.stream.write_all(format!("{command}\r\n").as_bytes()).await?;
        self.stream.flush().await?;

        let response = self.next_line().await?;
        debug!("relay: {} -> {}", shown, response);
        if response.starts_with(RESPONSE_OK) {
            Ok(response)
        } else {
            Err(PowerError::Rejected {
                command: shown.to_string(),
                response,
            })
        }
    }

    async fn quit(mut self) {
        if let Err(e) = self.command("quit", "quit").await {
            debug!("relay quit not acknowledged: {}", e);
        }
        self.stream.shutdown().await.ok();
    }
}

/// A NETIO-style power distribution unit
#[derive(Debug, Clone)]
pub struct PowerDevice {
    config: PowerDeviceConfig,
}

impl PowerDevice {
    /// Create a handle; no connection is made until a switch
    pub fn new(config: PowerDeviceConfig) -> Self {
        Self { config }
    }

    /// Relay name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Switch `outlet` on or off
    pub async fn switch_async(&self, outlet: u32, on: bool) -> Result<(), PowerError> {
        info!(
            "power device {}: outlet {} {}",
            self.config.name,
            outlet,
            if on { "on" } else { "off" }
        );
        let mut session = RelaySession::open(&self.config.host, self.config.port).await?;

        let login = format!("login {} {}", self.config.username, self.config.password);
        let login_shown = format!("login {} ***", self.config.username);
        let port = format!("port {} {}", outlet, u8::from(on));

        let result: Result<(), PowerError> = async {
            session.command(&login, &login_shown).await?;
            session.command(&port, &port).await?;
            Ok(())
        }
        .await;

        session.quit().await;
        result
    }

    /// Blocking [`PowerDevice::switch_async`]
    pub fn switch(&self, outlet: u32, on: bool) -> Result<(), PowerError> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        runtime.block_on(self.switch_async(outlet, on))
    }

    /// Switch off, wait `off_time`, switch on
    pub fn power_cycle(&self, outlet: u32, off_time: Duration) -> Result<(), PowerError> {
        self.switch(outlet, false)?;
        std::thread::sleep(off_time);
        if let Err(e) = self.switch(outlet, true) {
            warn!("power device {}: outlet {} left off: {}", self.config.name, outlet, e);
            return Err(e);
        }
        Ok(())
    }
}
