//! # Output multiplexer: prefixed child output on one console sink.
//!
//! Every child stream (stdout, stderr) and the per-instance status stream get
//! their own printer; all of them write through one synchronized [`Console`].
//!
//! ```text
//! web.0 stdout ──► printer ──┐
//! web.0 stderr ──► printer ──┼──► Console (Mutex<dyn Write>) ──► "web.0   : <line>"
//! db.0  stdout ──► printer ──┘
//! ```
//!
//! ## Rules
//! - Prefix width is fixed by the runner before any printer starts.
//! - Lines longer than the configured maximum are printed in chunks of that size.
//! - A printer runs until its stream reaches EOF, even after the owning
//!   attempt is cancelled, so the last lines of a finished child are printed.
//! - Read errors after cancellation, and closed-pipe conditions, end a printer
//!   silently. Any other read error is logged once and ends it.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const READ_BUFFER: usize = 64 * 1024;

/// Shared, line-synchronized console sink. Cheap to clone.
#[derive(Clone)]
pub struct Console {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Console {
    /// Console writing to the orchestrator's standard output.
    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    /// Console writing to an arbitrary sink.
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Writes `"<prefix>: <line>"` as one unit.
    pub fn print_line(&self, prefix: &str, line: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(sink, "{prefix}: {line}").and_then(|()| sink.flush()) {
            tracing::debug!(error = %e, "console write failed");
        }
    }

    /// Binds this console to one padded instance name.
    pub fn prefixed(&self, name: &str, width: usize) -> Prefixed {
        Prefixed {
            console: self.clone(),
            prefix: pad_name(name, width).into(),
        }
    }
}

/// Right-pads (or truncates) `name` to exactly `width` characters.
pub fn pad_name(name: &str, width: usize) -> String {
    format!("{name:<width$.width$}")
}

/// A console handle that prefixes every line with one instance's padded name.
#[derive(Clone, Debug)]
pub struct Prefixed {
    console: Console,
    prefix: Arc<str>,
}

impl Prefixed {
    pub fn line(&self, line: &str) {
        self.console.print_line(&self.prefix, line);
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Spawns a printer that copies `reader` line by line until it closes.
    ///
    /// The printer outlives the command: lines still buffered in the pipe when
    /// the child exits are printed. Killing the child closes the pipe, which
    /// ends the printer. `ctx` only silences read errors caused by that kill.
    pub fn spawn_printer<R>(&self, reader: R, max_line: usize, ctx: CancellationToken) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let out = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::with_capacity(READ_BUFFER, reader);
            out.print_stream(&mut reader, max_line.max(1), &ctx).await;
        })
    }

    async fn print_stream<R>(&self, reader: &mut R, max_line: usize, ctx: &CancellationToken)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();
        let mut warned = false;
        loop {
            match next_line(reader, &mut buf, max_line).await {
                Ok(None) => return,
                Ok(Some(complete)) => {
                    if !complete && !warned {
                        warned = true;
                        tracing::warn!(
                            instance = self.prefix.trim_end(),
                            max_line,
                            "output line exceeds limit, printing in chunks"
                        );
                    }
                    self.line(&String::from_utf8_lossy(trim_eol(&buf)));
                }
                Err(e) => {
                    if !ctx.is_cancelled() && !is_closed_pipe(&e) {
                        tracing::error!(instance = self.prefix.trim_end(), error = %e, "reading child output failed");
                        self.line(&format!("error: {e}"));
                    }
                    return;
                }
            }
        }
    }
}

/// Reads the next line (or a `max` sized chunk of an over-long one) into `line`.
///
/// Returns `None` at end of stream and `Some(complete)` otherwise, where
/// `complete` is false when the chunk was cut at `max` bytes.
async fn next_line<R>(reader: &mut R, line: &mut Vec<u8>, max: usize) -> io::Result<Option<bool>>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((!line.is_empty()).then_some(true));
        }

        let room = max - line.len();
        let (take, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) if i <= room => (i + 1, Some(true)),
            _ if available.len() >= room => (room, Some(false)),
            _ => (available.len(), None),
        };
        line.extend_from_slice(&available[..take]);
        reader.consume(take);

        if let Some(complete) = done {
            return Ok(Some(complete));
        }
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_closed_pipe(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[test]
    fn test_pad_name_pads_and_truncates() {
        assert_eq!(pad_name("web.0", 8), "web.0   ");
        assert_eq!(pad_name("worker.10", 8), "worker.1");
        assert_eq!(pad_name("", 3), "   ");
    }

    #[tokio::test]
    async fn test_printer_prefixes_every_line() {
        let cap = Capture::default();
        let out = Console::from_writer(cap.clone()).prefixed("web.0", 9);
        let (mut tx, rx) = tokio::io::duplex(64);

        let handle = out.spawn_printer(rx, 1024, CancellationToken::new());
        tx.write_all(b"hello\r\nworld\npartial").await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            cap.lines(),
            vec!["web.0    : hello", "web.0    : world", "web.0    : partial"]
        );
    }

    #[tokio::test]
    async fn test_long_lines_are_chunked() {
        let cap = Capture::default();
        let out = Console::from_writer(cap.clone()).prefixed("a.0", 4);
        let (mut tx, rx) = tokio::io::duplex(64);

        let handle = out.spawn_printer(rx, 4, CancellationToken::new());
        tx.write_all(b"abcdefghij\nwxyz\n").await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            cap.lines(),
            vec!["a.0 : abcd", "a.0 : efgh", "a.0 : ij", "a.0 : wxyz"]
        );
    }

    #[tokio::test]
    async fn test_cancel_does_not_drop_buffered_lines() {
        let cap = Capture::default();
        let out = Console::from_writer(cap.clone()).prefixed("a.0", 4);
        let (mut tx, rx) = tokio::io::duplex(64);
        let ctx = CancellationToken::new();

        tx.write_all(b"l1\nl2\nl3\n").await.unwrap();
        ctx.cancel();
        let handle = out.spawn_printer(rx, 16, ctx.clone());
        drop(tx);
        handle.await.unwrap();

        assert_eq!(cap.lines(), vec!["a.0 : l1", "a.0 : l2", "a.0 : l3"]);
    }
}
