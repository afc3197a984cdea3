//! Asynchronous daily log files.
//!
//! Producers enqueue already formatted lines on a bounded channel and never
//! wait; one background thread drains the channel in batches and appends
//! them to `<dir>/<year>-<month>-<day>-log.txt`, the date taken when the
//! batch is written.
//!
//! # Architecture
//!
//! ```text
//! task 1 ─┐
//! task 2 ─┼─► mpsc::Sender<Message> (try_send) ─► log thread ─► daily file
//! task N ─┘
//! ```
//!
//! A full queue drops the line and a failed write drops the batch; both are
//! counted and reported by [`LogSink::dropped`] and [`LogSink::write_errors`].

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{Datelike, Local, NaiveDate};
use tokio::sync::mpsc;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

/// Default queue capacity in lines.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Maximum lines appended per file open.
const MAX_BATCH_SIZE: usize = 64;

#[derive(Debug)]
enum Message {
    Write(Vec<u8>),
    Shutdown,
}

#[derive(Debug)]
struct Shared {
    dir: PathBuf,
    max_level: Level,
    dropped: AtomicU64,
    write_errors: AtomicU64,
    closed: AtomicBool,
}

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
}

/// Owns the log thread. Shutting down (or dropping) drains the queue and
/// joins the thread.
#[derive(Debug)]
pub struct LogGuard {
    tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

/// Log file for a given day.
pub fn log_file_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!(
        "{}-{}-{}-log.txt",
        date.year(),
        date.month(),
        date.day()
    ))
}

impl LogSink {
    /// Create `dir` if needed and start the log thread.
    ///
    /// Lines above `max_level` (more verbose) are discarded at the producer.
    pub fn start(
        dir: impl Into<PathBuf>,
        capacity: usize,
        max_level: Level,
    ) -> io::Result<(LogSink, LogGuard)> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let (sink, rx) = Self::with_queue(dir, capacity, max_level);
        let shared = sink.shared.clone();
        let thread = std::thread::Builder::new()
            .name("beacon-log".to_string())
            .spawn(move || write_loop(rx, shared))?;

        let guard = LogGuard {
            tx: sink.tx.clone(),
            shared: sink.shared.clone(),
            thread: Some(thread),
        };
        Ok((sink, guard))
    }

    fn with_queue(
        dir: PathBuf,
        capacity: usize,
        max_level: Level,
    ) -> (LogSink, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shared = Arc::new(Shared {
            dir,
            max_level,
            dropped: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        (LogSink { tx, shared }, rx)
    }

    /// Check if lines at `level` are kept.
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.shared.max_level
    }

    /// Format and enqueue one line. Never blocks.
    ///
    /// Returns `false` if the line was filtered out or dropped.
    pub fn log(&self, level: Level, message: &str) -> bool {
        if !self.enabled(level) {
            return false;
        }
        let line = format!(
            "{} [{}] {}\n",
            Local::now().format("%H:%M:%S%.3f"),
            level,
            message
        );
        self.enqueue(line.into_bytes())
    }

    fn enqueue(&self, bytes: Vec<u8>) -> bool {
        if bytes.is_empty() {
            return true;
        }
        if self.shared.closed.load(Ordering::Acquire) {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.tx.try_send(Message::Write(bytes)) {
            Ok(()) => true,
            Err(_) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Lines dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Lines lost to failed file writes.
    pub fn write_errors(&self) -> u64 {
        self.shared.write_errors.load(Ordering::Relaxed)
    }

    /// Directory receiving the log files.
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }
}

impl LogGuard {
    /// Stop accepting lines, write everything queued so far and join the
    /// log thread.
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shared.closed.store(true, Ordering::Release);

        // blocking_send panics on a runtime thread, so send from a plain one
        let tx = self.tx.clone();
        let _ = std::thread::spawn(move || tx.blocking_send(Message::Shutdown)).join();
        let _ = thread.join();
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Log thread: receive, batch, append.
fn write_loop(mut rx: mpsc::Receiver<Message>, shared: Arc<Shared>) {
    let mut batch: Vec<Vec<u8>> = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        // Wait for the first line
        match rx.blocking_recv() {
            Some(Message::Write(line)) => batch.push(line),
            Some(Message::Shutdown) | None => return,
        }

        // Collect additional ready lines
        let mut stop = false;
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(Message::Write(line)) => batch.push(line),
                Ok(Message::Shutdown) => {
                    stop = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let path = log_file_path(&shared.dir, Local::now().date_naive());
        if let Err(e) = append(&path, &batch) {
            shared
                .write_errors
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            eprintln!("log write to {} failed: {}", path.display(), e);
        }
        batch.clear();

        if stop {
            return;
        }
    }
}

fn append(path: &Path, batch: &[Vec<u8>]) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for line in batch {
        file.write_all(line)?;
    }
    file.flush()
}

/// Per-event writer handed out to `tracing_subscriber::fmt`.
///
/// Buffers one formatted event and enqueues it on drop.
#[derive(Debug)]
pub struct SinkWriter {
    sink: Option<LogSink>,
    buf: Vec<u8>,
}

impl Write for SinkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.sink.is_some() {
            self.buf.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SinkWriter {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.enqueue(std::mem::take(&mut self.buf));
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter {
            sink: Some(self.clone()),
            buf: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SinkWriter {
            sink: self.enabled(*meta.level()).then(|| self.clone()),
            buf: Vec::new(),
        }
    }
}
