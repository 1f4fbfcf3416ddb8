//! Textual progress line for uploads and downloads.
//!
//! Part transfers may run concurrently, so all counters live behind one
//! mutex and the line is rendered while it is held.

use crate::{
    errors::{HcpError, HcpResult},
    models::object::ObjectDescriptor,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::{
    io::Write,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Shows the progress line of the running transfer.
pub trait ProgressDisplay: Send + Sync {
    /// Replace the current line with `line`.
    fn draw(&self, line: &str);

    /// Leave the last line in place and move to the next one.
    fn finish(&self);
}

/// Where progress lines go. A terminal bar in the binary, a buffer in tests.
pub type ProgressSink = Arc<dyn ProgressDisplay>;

/// Writes `\r`-prefixed lines to any writer.
pub struct WriterDisplay {
    out: Arc<Mutex<dyn Write + Send>>,
}

impl WriterDisplay {
    pub fn new(out: Arc<Mutex<dyn Write + Send>>) -> Self {
        Self { out }
    }

    fn write(&self, bytes: &[u8]) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // Sink write errors are ignored.
        let _ = out.write_all(bytes);
        let _ = out.flush();
    }
}

impl ProgressDisplay for WriterDisplay {
    fn draw(&self, line: &str) {
        self.write(format!("\r{}", line).as_bytes());
    }

    fn finish(&self) {
        self.write(b"\n");
    }
}

/// Redraws the line on stdout through `indicatif`, one bar per transfer.
/// Hidden when stdout is not a terminal.
#[derive(Default)]
pub struct TerminalDisplay {
    bar: Mutex<Option<ProgressBar>>,
}

impl TerminalDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressDisplay for TerminalDisplay {
    fn draw(&self, line: &str) {
        let mut bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        bar.get_or_insert_with(|| {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
            if let Ok(style) = ProgressStyle::with_template("{msg}") {
                bar.set_style(style);
            }
            bar
        })
        .set_message(line.to_string());
    }

    fn finish(&self) {
        let bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(bar) = bar {
            bar.finish();
        }
    }
}

/// Minimum time between two throughput recomputations.
pub const SPEED_INTERVAL: Duration = Duration::from_secs(1);

/// What is being transferred; decides where the total size comes from.
#[derive(Clone, Copy, Debug)]
pub enum ProgressSource<'a> {
    /// Upload of a local file; size is read from the filesystem.
    LocalFile(&'a Path),
    /// Download of a remote object; size comes from the descriptor.
    Remote(&'a ObjectDescriptor),
}

impl ProgressSource<'_> {
    fn label(&self) -> String {
        match self {
            ProgressSource::LocalFile(path) => path.display().to_string(),
            ProgressSource::Remote(obj) => obj.key.clone(),
        }
    }

    fn total_size(&self) -> HcpResult<u64> {
        match self {
            ProgressSource::LocalFile(path) => {
                let meta = std::fs::metadata(path)?;
                if !meta.is_file() {
                    return Err(HcpError::UnknownSourceType(format!(
                        "{} is not a regular file",
                        path.display()
                    )));
                }
                Ok(meta.len())
            }
            ProgressSource::Remote(obj) => Ok(obj.size),
        }
    }
}

/// Per-transfer counters.
#[derive(Debug)]
struct TransferProgressState {
    seen: u64,
    total: u64,
    last_sample_at: Instant,
    last_sample_bytes: u64,
    speed: f64,
}

impl TransferProgressState {
    fn new(total: u64, now: Instant) -> Self {
        Self {
            seen: 0,
            total,
            last_sample_at: now,
            last_sample_bytes: 0,
            speed: 0.0,
        }
    }

    /// Add `delta` bytes; recompute MB/s only once the interval has passed.
    fn advance(&mut self, delta: u64, now: Instant) {
        self.seen += delta;
        let elapsed = now.saturating_duration_since(self.last_sample_at);
        if elapsed > SPEED_INTERVAL {
            let bytes = (self.seen - self.last_sample_bytes) as f64;
            let per_sec = bytes / elapsed.as_secs_f64() / (1024.0 * 1024.0);
            self.speed = (per_sec * 100.0).round() / 100.0;
            self.last_sample_at = now;
            self.last_sample_bytes = self.seen;
        }
    }

    fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.seen as f64 / self.total as f64 * 100.0
    }
}

/// Progress callback for one transfer. Created per call and dropped at the end.
pub struct ProgressReporter {
    label: String,
    state: Mutex<TransferProgressState>,
    sink: ProgressSink,
}

impl ProgressReporter {
    /// Fails with `UnknownSourceType` when the size cannot be determined.
    pub fn new(source: ProgressSource<'_>, sink: ProgressSink) -> HcpResult<Self> {
        let total = source.total_size()?;
        Ok(Self::with_start(source.label(), total, sink, Instant::now()))
    }

    fn with_start(label: String, total: u64, sink: ProgressSink, start: Instant) -> Self {
        Self {
            label,
            state: Mutex::new(TransferProgressState::new(total, start)),
            sink,
        }
    }

    pub fn total(&self) -> u64 {
        self.lock_state().total
    }

    /// Record `delta` more bytes and redraw the line.
    pub fn sample(&self, delta: u64) {
        self.sample_at(delta, Instant::now());
    }

    fn sample_at(&self, delta: u64, now: Instant) {
        let mut state = self.lock_state();
        state.advance(delta, now);
        let line = format!(
            "{}  {} / {}  {}MB/s  ({:.2}%)      ",
            self.label,
            state.seen,
            state.total,
            state.speed,
            state.percentage()
        );
        self.sink.draw(&line);
    }

    /// Terminate the progress line.
    pub fn finish(&self) {
        self.sink.finish();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TransferProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Terminal progress bar on stdout.
pub fn stdout_sink() -> ProgressSink {
    Arc::new(TerminalDisplay::new())
}

/// Sink discarding everything.
pub fn null_sink() -> ProgressSink {
    Arc::new(WriterDisplay::new(Arc::new(Mutex::new(std::io::sink()))))
}
