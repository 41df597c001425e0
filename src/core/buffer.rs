//! Line buffers and pattern watches
//!
//! A [`Buffer`] collects the lines a process writes to one of its output
//! streams. It is filled by a single reader thread and never mutated in place.
//! A [`BufferWatcher`] hands out watches into a buffer: each watch remembers
//! the line where it started, so a later [`BufferWatcher::wait_for_msg`] sees
//! every line appended after the watch was created, even lines that arrived
//! before the wait itself began.

use parking_lot::{Condvar, Mutex};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Append-only, thread-safe sequence of text lines
#[derive(Debug, Default)]
pub struct Buffer {
    lines: Mutex<Vec<String>>,
    appended: Condvar,
}

impl Buffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line and wake up waiting watchers
    pub fn append(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
        self.appended.notify_all();
    }

    /// Copy of all lines appended so far
    pub fn get_all_data(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Lines from `offset` to the current end
    pub fn lines_from(&self, offset: usize) -> Vec<String> {
        let lines = self.lines.lock();
        lines.get(offset..).map(<[String]>::to_vec).unwrap_or_default()
    }

    /// Number of lines
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Is the buffer empty?
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Wake up all waiters without appending
    fn wake_all(&self) {
        let _lines = self.lines.lock();
        self.appended.notify_all();
    }
}

/// Identifier of a watch, valid until the watch is consumed or times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a watcher stopped waiting for new lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitState {
    Grew,
    TimedOut,
    Removed,
}

/// Named subscriptions into a [`Buffer`]
#[derive(Debug)]
pub struct BufferWatcher {
    name: String,
    buffer: Arc<Buffer>,
    /// watch id -> index of the first line not yet scanned
    watches: Mutex<HashMap<WatchId, usize>>,
    next_id: AtomicU64,
}

impl BufferWatcher {
    /// Create a watcher for `buffer`; `name` shows up in log messages
    pub fn new(name: impl Into<String>, buffer: Arc<Buffer>) -> Self {
        Self {
            name: name.into(),
            buffer,
            watches: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The watched buffer
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Start a watch at the current end of the buffer
    ///
    /// Lines appended from now on are visible to the watch, lines already in
    /// the buffer are not.
    pub fn start_watch(&self) -> WatchId {
        let offset = self.buffer.len();
        self.insert_watch(offset)
    }

    /// Start a watch at the beginning of the buffer
    ///
    /// Used for messages that may have been printed before anybody started
    /// watching.
    pub fn get_watch_from_beginning(&self) -> WatchId {
        self.insert_watch(0)
    }

    fn insert_watch(&self, offset: usize) -> WatchId {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.watches.lock().insert(id, offset);
        debug!(watcher = %self.name, watch = %id, offset, "watch started");
        id
    }

    /// Invalidate a watch; returns false if it was not valid
    pub fn remove_watch(&self, id: WatchId) -> bool {
        let removed = self.watches.lock().remove(&id).is_some();
        if removed {
            // a waiter blocked on this watch must observe the removal
            self.buffer.wake_all();
        }
        removed
    }

    /// Is the watch still valid?
    pub fn is_watch_valid(&self, id: WatchId) -> bool {
        self.watches.lock().contains_key(&id)
    }

    /// Number of currently valid watches
    pub fn active_watches(&self) -> usize {
        self.watches.lock().len()
    }

    fn offset_of(&self, id: WatchId) -> Option<usize> {
        self.watches.lock().get(&id).copied()
    }

    fn advance(&self, id: WatchId, offset: usize) -> bool {
        match self.watches.lock().get_mut(&id) {
            Some(current) => {
                *current = offset;
                true
            }
            None => false,
        }
    }

    /// Wait until `pattern` matches a line seen by the watch
    ///
    /// Lines are scanned from the watch's start offset. The watch is consumed
    /// by this call: it is removed on a match, on timeout and on rejection, so
    /// every watch id can be waited on at most once.
    ///
    /// - `watch == None`, an unknown or already consumed watch, an invalid
    ///   regex, or neither `pattern` nor `timeout`: returns false immediately
    ///   and logs an error.
    /// - `pattern == None` with a timeout: waits out the timeout and returns
    ///   true.
    /// - `pattern` with `timeout == None`: **blocks until the pattern
    ///   appears**, however long that takes.
    pub fn wait_for_msg(
        &self,
        watch: Option<WatchId>,
        pattern: Option<&str>,
        timeout: Option<Duration>,
    ) -> bool {
        let Some(id) = watch else {
            error!(watcher = %self.name, "wait_for_msg called without a watch id");
            return false;
        };
        let Some(mut offset) = self.offset_of(id) else {
            error!(watcher = %self.name, watch = %id, "watch is not valid (never started, already matched or timed out)");
            return false;
        };

        let Some(pattern) = pattern else {
            let Some(timeout) = timeout else {
                error!(watcher = %self.name, watch = %id, "neither a message nor a timeout given, refusing to wait forever");
                self.remove_watch(id);
                return false;
            };
            std::thread::sleep(timeout);
            self.remove_watch(id);
            return true;
        };

        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                error!(watcher = %self.name, watch = %id, "invalid pattern '{}': {}", pattern, e);
                self.remove_watch(id);
                return false;
            }
        };

        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let lines = self.buffer.lines_from(offset);
            if let Some(line) = lines.iter().find(|line| regex.is_match(line)) {
                debug!(watcher = %self.name, watch = %id, "found '{}' in: {}", pattern, line);
                self.remove_watch(id);
                return true;
            }
            offset += lines.len();
            if !self.advance(id, offset) {
                warn!(watcher = %self.name, watch = %id, "watch removed while waiting for '{}'", pattern);
                return false;
            }

            match self.wait_for_lines(id, offset, deadline) {
                WaitState::Grew => {}
                WaitState::Removed => {
                    warn!(watcher = %self.name, watch = %id, "watch removed while waiting for '{}'", pattern);
                    return false;
                }
                WaitState::TimedOut => {
                    // lines may have arrived right at the deadline
                    let late = self.buffer.lines_from(offset);
                    self.remove_watch(id);
                    if late.iter().any(|line| regex.is_match(line)) {
                        return true;
                    }
                    warn!(
                        watcher = %self.name,
                        watch = %id,
                        "timeout ({:?}) while waiting for '{}'",
                        timeout.unwrap_or_default(),
                        pattern
                    );
                    return false;
                }
            }
        }
    }

    fn wait_for_lines(&self, id: WatchId, known_len: usize, deadline: Option<Instant>) -> WaitState {
        let mut lines = self.buffer.lines.lock();
        loop {
            if !self.is_watch_valid(id) {
                return WaitState::Removed;
            }
            if lines.len() > known_len {
                return WaitState::Grew;
            }
            match deadline {
                Some(deadline) => {
                    if self.buffer.appended.wait_until(&mut lines, deadline).timed_out() {
                        return if lines.len() > known_len {
                            WaitState::Grew
                        } else {
                            WaitState::TimedOut
                        };
                    }
                }
                None => self.buffer.appended.wait(&mut lines),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn watcher() -> BufferWatcher {
        BufferWatcher::new("test", Arc::new(Buffer::new()))
    }

    #[test]
    fn test_append_read_your_writes() {
        let buffer = Buffer::new();
        buffer.append("first");
        buffer.append("second");
        let data = buffer.get_all_data();
        assert_eq!(data.last().map(String::as_str), Some("second"));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.lines_from(1), vec!["second".to_string()]);
        assert!(buffer.lines_from(5).is_empty());
    }

    #[test]
    fn test_match_consumes_watch() {
        let w = watcher();
        let id = w.start_watch();
        w.buffer().append("foo");
        w.buffer().append("bar matched");
        w.buffer().append("baz");

        assert!(w.wait_for_msg(Some(id), Some("matched"), Some(Duration::from_secs(1))));
        assert!(!w.is_watch_valid(id));

        let start = Instant::now();
        assert!(!w.wait_for_msg(Some(id), Some("matched"), Some(Duration::from_secs(5))));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_blocks_until_line_arrives() {
        let w = Arc::new(watcher());
        let id = w.start_watch();

        let producer = {
            let buffer = Arc::clone(w.buffer());
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                buffer.append("renderer ready");
            })
        };

        let start = Instant::now();
        assert!(w.wait_for_msg(Some(id), Some("ready"), Some(Duration::from_secs(5))));
        assert!(start.elapsed() >= Duration::from_millis(150));
        producer.join().unwrap();
    }

    #[test]
    fn test_timeout_removes_watch() {
        let w = watcher();
        let id = w.start_watch();
        w.buffer().append("something else");

        let start = Instant::now();
        assert!(!w.wait_for_msg(Some(id), Some("never printed"), Some(Duration::from_millis(200))));
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(!w.is_watch_valid(id));
        assert_eq!(w.active_watches(), 0);
    }

    #[test]
    fn test_watch_offsets() {
        let w = watcher();
        w.buffer().append("early message");

        let late = w.start_watch();
        assert!(!w.wait_for_msg(Some(late), Some("early"), Some(Duration::from_millis(50))));

        let from_start = w.get_watch_from_beginning();
        assert!(w.wait_for_msg(Some(from_start), Some("early"), Some(Duration::from_millis(50))));
    }

    #[test]
    fn test_concurrent_watches() {
        let w = watcher();
        let first = w.start_watch();
        w.buffer().append("one");
        let second = w.start_watch();
        w.buffer().append("two");

        assert!(w.wait_for_msg(Some(first), Some("one"), Some(Duration::from_millis(50))));
        assert!(!w.wait_for_msg(Some(second), Some("one"), Some(Duration::from_millis(50))));
    }

    #[test]
    fn test_rejections_do_not_block() {
        let w = watcher();
        let start = Instant::now();

        assert!(!w.wait_for_msg(None, Some("x"), Some(Duration::from_secs(5))));

        let id = w.start_watch();
        assert!(!w.wait_for_msg(Some(id), None, None));
        assert!(!w.is_watch_valid(id));

        let id = w.start_watch();
        assert!(!w.wait_for_msg(Some(id), Some("(unclosed"), None));
        assert!(!w.is_watch_valid(id));

        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_settle_wait_without_pattern() {
        let w = watcher();
        let id = w.start_watch();
        let start = Instant::now();
        assert!(w.wait_for_msg(Some(id), None, Some(Duration::from_millis(100))));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(!w.is_watch_valid(id));
    }

    #[test]
    fn test_unbounded_wait() {
        let w = Arc::new(watcher());
        let id = w.start_watch();
        let buffer = Arc::clone(w.buffer());
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            buffer.append("late line");
        });
        assert!(w.wait_for_msg(Some(id), Some("late"), None));
        producer.join().unwrap();
    }

    #[test]
    fn test_removal_wakes_unbounded_waiter() {
        let w = Arc::new(watcher());
        let id = w.start_watch();
        let remover = {
            let w = Arc::clone(&w);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                w.remove_watch(id);
            })
        };
        assert!(!w.wait_for_msg(Some(id), Some("never"), None));
        remover.join().unwrap();
    }
}
