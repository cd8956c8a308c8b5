//! Output proxies
//!
//! One process-wide proxy per stream (stdout, stderr, log sink). Bytes
//! written from a thread bound to a task are split into lines per thread and
//! appended to that task's log; bytes from any other thread go to the real
//! stream untouched. A write never fails: internal errors fall back to the
//! real stream.
//!
//! Line handling: `\n` and `\r\n` end a line (also when split across
//! writes); a bare `\r` discards what was buffered before it, the way a
//! terminal overwrites a progress line.

use crate::log::LogLevel;
use crate::routing::RoutingTable;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use tracing::debug;

static STDOUT_PROXY: OnceLock<OutputProxy> = OnceLock::new();
static STDERR_PROXY: OnceLock<OutputProxy> = OnceLock::new();
static LOG_PROXY: OnceLock<OutputProxy> = OnceLock::new();
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Stream a proxy stands in for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
    /// Formatted records from the logging facade
    Log,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Stdout, Stream::Stderr, Stream::Log];

    pub fn level(self) -> LogLevel {
        match self {
            Stream::Stdout => LogLevel::Stdout,
            Stream::Stderr => LogLevel::Stderr,
            Stream::Log => LogLevel::Log,
        }
    }
}

// ============================================================================
// LineBuffer
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
    pending_cr: bool,
}

impl LineBuffer {
    /// Feed bytes, returning every line they complete
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    lines.push(self.take_line());
                    continue;
                }
                self.buf.clear();
            }
            match byte {
                b'\n' => lines.push(self.take_line()),
                b'\r' => self.pending_cr = true,
                _ => self.buf.push(byte),
            }
        }
        lines
    }

    /// Partial line left over, with a trailing `\r` dropped
    pub(crate) fn take_residual(&mut self) -> Option<String> {
        self.pending_cr = false;
        if self.buf.is_empty() {
            return None;
        }
        Some(self.take_line())
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buf);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

// ============================================================================
// OutputProxy
// ============================================================================

pub struct OutputProxy {
    stream: Stream,
    buffers: Mutex<HashMap<ThreadId, LineBuffer>>,
}

impl OutputProxy {
    fn new(stream: Stream) -> Self {
        Self {
            stream,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let routed = panic::catch_unwind(AssertUnwindSafe(|| self.route(bytes))).unwrap_or(false);
        if !routed {
            self.passthrough(bytes);
        }
    }

    pub fn write_str(&self, text: &str) {
        self.write(text.as_bytes());
    }

    /// Emit the calling thread's partial line and flush the real stream
    pub fn flush(&self) {
        self.flush_context(thread::current().id());
        self.flush_original();
    }

    /// Number of threads holding a partial line
    pub fn buffered_contexts(&self) -> usize {
        self.buffers.lock().len()
    }

    fn route(&self, bytes: &[u8]) -> bool {
        let context = thread::current().id();
        let Some(binding) = RoutingTable::global().binding(context) else {
            return false;
        };
        let Some(task) = binding.task() else {
            return false;
        };

        let lines = self
            .buffers
            .lock()
            .entry(context)
            .or_default()
            .feed(bytes);
        for line in lines {
            task.append_output(binding.run(), self.stream.level(), line);
        }
        true
    }

    pub(crate) fn flush_context(&self, context: ThreadId) {
        let residual = self
            .buffers
            .lock()
            .remove(&context)
            .and_then(|mut buffer| buffer.take_residual());
        let Some(line) = residual else {
            return;
        };

        let routed = panic::catch_unwind(AssertUnwindSafe(|| {
            match RoutingTable::global().binding(context) {
                Some(binding) => match binding.task() {
                    Some(task) => {
                        task.append_output(binding.run(), self.stream.level(), line.clone());
                        true
                    }
                    None => false,
                },
                None => false,
            }
        }))
        .unwrap_or(false);
        if !routed {
            self.passthrough(format!("{}\n", line).as_bytes());
        }
    }

    fn passthrough(&self, bytes: &[u8]) {
        match self.stream {
            Stream::Stdout => {
                let mut out = io::stdout().lock();
                let _ = out.write_all(bytes);
            }
            Stream::Stderr | Stream::Log => {
                let mut err = io::stderr().lock();
                let _ = err.write_all(bytes);
            }
        }
    }

    fn flush_original(&self) {
        let _ = match self.stream {
            Stream::Stdout => io::stdout().flush(),
            Stream::Stderr | Stream::Log => io::stderr().flush(),
        };
    }
}

impl std::fmt::Debug for OutputProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputProxy")
            .field("stream", &self.stream)
            .finish()
    }
}

/// Process-wide proxy for `stream`
pub fn proxy(stream: Stream) -> &'static OutputProxy {
    let cell = match stream {
        Stream::Stdout => &STDOUT_PROXY,
        Stream::Stderr => &STDERR_PROXY,
        Stream::Log => &LOG_PROXY,
    };
    cell.get_or_init(|| OutputProxy::new(stream))
}

/// Install the proxies; later calls are no-ops returning false
pub fn install() -> bool {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        return false;
    }
    for stream in Stream::ALL {
        proxy(stream);
    }
    debug!("Task output proxies installed");
    true
}

pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Acquire)
}

/// Flush every stream's partial line for `context`
pub(crate) fn flush_context(context: ThreadId) {
    for stream in Stream::ALL {
        proxy(stream).flush_context(context);
    }
}

// ============================================================================
// io::Write handles
// ============================================================================

/// `io::Write` front for a proxy
#[derive(Debug, Clone, Copy)]
pub struct ProxyWriter {
    stream: Stream,
}

impl Write for ProxyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        proxy(self.stream).write(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        proxy(self.stream).flush();
        Ok(())
    }
}

pub fn stdout() -> ProxyWriter {
    ProxyWriter {
        stream: Stream::Stdout,
    }
}

pub fn stderr() -> ProxyWriter {
    ProxyWriter {
        stream: Stream::Stderr,
    }
}

/// `println!` through the stdout proxy
#[macro_export]
macro_rules! task_println {
    () => {{
        use ::std::io::Write as _;
        let _ = ::std::writeln!($crate::output::stdout());
    }};
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        let _ = ::std::writeln!($crate::output::stdout(), $($arg)*);
    }};
}

/// `eprintln!` through the stderr proxy
#[macro_export]
macro_rules! task_eprintln {
    () => {{
        use ::std::io::Write as _;
        let _ = ::std::writeln!($crate::output::stderr());
    }};
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        let _ = ::std::writeln!($crate::output::stderr(), $($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(chunks: &[&str]) -> (Vec<String>, Option<String>) {
        let mut buffer = LineBuffer::default();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(buffer.feed(chunk.as_bytes()));
        }
        (lines, buffer.take_residual())
    }

    #[test]
    fn test_carriage_return_overwrites() {
        let (lines, residual) = feed_all(&["abc\rdef\n"]);
        assert_eq!(lines, vec!["def"]);
        assert!(residual.is_none());
    }

    #[test]
    fn test_crlf_is_one_terminator() {
        let (lines, _) = feed_all(&["one\r\ntwo\r", "\nthree\n"]);
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_progress_line() {
        let (lines, _) = feed_all(&["10%\r", "50%\r", "100%\r\n"]);
        assert_eq!(lines, vec!["100%"]);
    }

    #[test]
    fn test_partial_line_waits_for_terminator() {
        let (lines, residual) = feed_all(&["tick ", "1"]);
        assert!(lines.is_empty());
        assert_eq!(residual.as_deref(), Some("tick 1"));
    }

    #[test]
    fn test_residual_drops_stray_cr() {
        let (lines, residual) = feed_all(&["done\r"]);
        assert!(lines.is_empty());
        assert_eq!(residual.as_deref(), Some("done"));
    }

    #[test]
    fn test_blank_lines_are_kept() {
        let (lines, _) = feed_all(&["a\n\nb\n"]);
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    #[test]
    fn test_multibyte_split_across_writes() {
        let bytes = "héllo\n".as_bytes();
        let mut buffer = LineBuffer::default();
        assert!(buffer.feed(&bytes[..2]).is_empty());
        assert_eq!(buffer.feed(&bytes[2..]), vec!["héllo"]);
    }

    #[test]
    fn test_install_is_idempotent() {
        install();
        assert!(!install());
        assert!(is_installed());
    }

    #[test]
    fn test_unbound_write_does_not_buffer() {
        let proxy = proxy(Stream::Stderr);
        proxy.write_str("");
        let mut writer = stderr();
        writer.write_all(b"unbound line from test\n").unwrap();
        assert!(proxy
            .buffers
            .lock()
            .get(&thread::current().id())
            .is_none());
    }
}
