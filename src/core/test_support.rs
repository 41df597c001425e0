//! In-memory processes for unit tests

use super::application::ProcessIo;
use crossbeam_channel::{Receiver, Sender};
use std::io::{self, Read, Write};

/// Reads byte chunks from a channel; EOF once all senders are gone
pub(crate) struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    pub(crate) fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self { rx, pending: Vec::new(), pos: 0 }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

type Responder = Box<dyn Fn(&str) -> Vec<String> + Send>;

/// Stdin that answers every complete line through `respond`
struct ScriptedStdin {
    tx: Sender<Vec<u8>>,
    respond: Responder,
    partial: String,
}

impl Write for ScriptedStdin {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.partial.push_str(&String::from_utf8_lossy(buf));
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            for response in (self.respond)(line.trim_end()) {
                self.tx
                    .send(format!("{response}\n").into_bytes())
                    .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed"))?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A fake process printing `initial` and answering stdin lines via `respond`
///
/// Its stdout ends when the stdin handle is dropped; stderr is empty.
pub(crate) fn scripted_process<F>(initial: &[&str], respond: F) -> ProcessIo
where
    F: Fn(&str) -> Vec<String> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    for line in initial {
        let _ = tx.send(format!("{line}\n").into_bytes());
    }
    let (_stderr_tx, stderr_rx) = crossbeam_channel::unbounded::<Vec<u8>>();

    ProcessIo {
        stdin: Box::new(ScriptedStdin {
            tx,
            respond: Box::new(respond),
            partial: String::new(),
        }),
        stdout: Box::new(ChannelReader::new(rx)),
        stderr: Box::new(ChannelReader::new(stderr_rx)),
        pid: None,
    }
}
