//! Background readers that drain process output into line buffers
//!
//! Every stdout/stderr stream of a started application gets its own thread
//! which reads line by line and appends to a [`Buffer`]. Non-UTF-8 output is
//! decoded lossily instead of failing the reader.

use super::buffer::Buffer;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How long `stop` waits for a reader before abandoning it
///
/// Kept just below the usual CI job timeout, so a remote process that never
/// closes its pipe cannot hang the whole run.
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(185);

/// Pause after a transient read error (non-blocking or timed-out streams)
const RETRY_SLEEP: Duration = Duration::from_millis(10);

/// Thread draining one stream into a [`Buffer`]
#[derive(Debug)]
pub struct PipeReader {
    name: String,
    stop_requested: Arc<AtomicBool>,
    done: Receiver<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PipeReader {
    /// Start reading `source` into `buffer` on a new thread
    pub fn spawn<R>(name: impl Into<String>, source: R, buffer: Arc<Buffer>) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let name = name.into();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new().name(format!("reader-{name}")).spawn({
            let name = name.clone();
            let stop_requested = Arc::clone(&stop_requested);
            move || {
                Self::reader_thread(&name, source, &buffer, &stop_requested);
                let _ = done_tx.send(());
            }
        })?;

        Ok(Self {
            name,
            stop_requested,
            done,
            thread: Some(thread),
        })
    }

    fn reader_thread<R: Read>(name: &str, source: R, buffer: &Buffer, stop_requested: &AtomicBool) {
        let mut reader = BufReader::new(source);
        let mut raw = Vec::new();

        loop {
            match reader.read_until(b'\n', &mut raw) {
                Ok(0) => break,
                Ok(_) => {
                    if raw.ends_with(b"\n") {
                        buffer.append(decode_line(&raw));
                        raw.clear();
                    }
                }
                Err(e) if is_transient(e.kind()) => {
                    if stop_requested.load(Ordering::Acquire) {
                        break;
                    }
                    thread::sleep(RETRY_SLEEP);
                }
                Err(e) => {
                    warn!(reader = name, "read error, stopping reader: {}", e);
                    break;
                }
            }
        }

        if !raw.is_empty() {
            buffer.append(decode_line(&raw));
        }
        debug!(reader = name, "reader finished");
    }

    /// Name of the stream
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Has the reader thread ended?
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, thread::JoinHandle::is_finished)
    }

    /// Stop the reader, waiting at most [`READER_JOIN_TIMEOUT`]
    pub fn stop(&mut self) -> bool {
        self.stop_with_timeout(READER_JOIN_TIMEOUT)
    }

    /// Stop the reader, waiting at most `timeout` for it to drain its stream
    ///
    /// Returns false if the reader had to be abandoned. Unread output is lost
    /// in that case; this is logged, never raised.
    pub fn stop_with_timeout(&mut self, timeout: Duration) -> bool {
        self.stop_requested.store(true, Ordering::Release);
        let Some(thread) = self.thread.take() else {
            return true;
        };

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!(reader = %self.name, "reader thread panicked");
                    return false;
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    reader = %self.name,
                    "reader did not finish within {:?}, abandoning it with unread output",
                    timeout
                );
                false
            }
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::Release);
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted)
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
