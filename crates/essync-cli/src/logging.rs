//! Logging setup
//!
//! Console output filtered by `RUST_LOG` or the configured level, plus one
//! file per level under the log directory:
//!
//! | file               | levels        |
//! |--------------------|---------------|
//! | `essync_error.log` | ERROR         |
//! | `essync_info.log`  | INFO and up   |
//! | `essync_debug.log` | DEBUG and up  |
//!
//! File lines start with a local `%Y-%m-%d %H:%M:%S%.3f` timestamp, which
//! the `/exporter` endpoint reads back. Files are written from a background
//! worker and rotated daily or at [`MAX_FILE_BYTES`]; the live file always
//! keeps the name above.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDate};
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Size at which a log file is rotated before the day is over
pub const MAX_FILE_BYTES: u64 = 1000 * 1024 * 1024;

/// Flushes the file writers when dropped; hold until exit
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

pub fn init(log_dir: &Path, level: &str) -> anyhow::Result<LogGuards> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let mut layers = Vec::new();
    let mut guards = Vec::new();
    for (name, filter) in [
        (essync_core::ERROR_LOG_FILE, LevelFilter::ERROR),
        (essync_core::INFO_LOG_FILE, LevelFilter::INFO),
        (essync_core::DEBUG_LOG_FILE, LevelFilter::DEBUG),
    ] {
        let (layer, guard) = file_layer(log_dir, name, filter)?;
        layers.push(layer);
        guards.push(guard);
    }

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(layers)
        .with(fmt::layer().with_target(true).with_filter(console_filter))
        .try_init()
        .context("installing the tracing subscriber")?;

    Ok(LogGuards { _guards: guards })
}

fn file_layer<S>(
    dir: &Path,
    name: &str,
    level: LevelFilter,
) -> anyhow::Result<(Box<dyn Layer<S> + Send + Sync>, WorkerGuard)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let file = RollingFile::open(dir.join(name), MAX_FILE_BYTES)?;
    let (writer, guard) = NonBlockingBuilder::default()
        .lossy(false)
        .thread_name("essync-log")
        .finish(file);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_timer(ChronoLocal::new(FILE_TIMESTAMP_FORMAT.to_string()))
        .with_filter(level)
        .boxed();

    Ok((layer, guard))
}

/// Append-only log file with a fixed name
///
/// On the first write of a new local day the file is renamed to
/// `<name>.<YYYY-MM-DD>` for the day it covers, and a fresh file is opened
/// under the original name. A file reaching `max_bytes` is rotated the same
/// way within the day, with a `.1`, `.2`, ... suffix when the dated name is
/// taken.
pub struct RollingFile {
    path: PathBuf,
    max_bytes: u64,
    file: File,
    day: NaiveDate,
    written: u64,
}

impl RollingFile {
    pub fn open(path: PathBuf, max_bytes: u64) -> anyhow::Result<Self> {
        let file =
            append(&path).with_context(|| format!("opening log file {}", path.display()))?;
        let metadata = file
            .metadata()
            .with_context(|| format!("reading log file {}", path.display()))?;
        // A file left over from an earlier day is rotated on the first write.
        let day = metadata
            .modified()
            .map(|at| DateTime::<Local>::from(at).date_naive())
            .unwrap_or_else(|_| Local::now().date_naive());

        Ok(Self {
            path,
            max_bytes,
            file,
            day,
            written: metadata.len(),
        })
    }

    fn write_on(&mut self, buf: &[u8], today: NaiveDate) -> io::Result<usize> {
        let full = self.written > 0 && self.written + buf.len() as u64 > self.max_bytes;
        if today != self.day || full {
            // A failed rotation keeps appending to the current file.
            let _ = self.rotate();
            self.day = today;
        }

        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let rotated = self.free_name();
        fs::rename(&self.path, &rotated)?;
        self.file = append(&self.path)?;
        self.written = 0;
        Ok(())
    }

    fn free_name(&self) -> PathBuf {
        let dated = format!("{}.{}", self.path.display(), self.day.format("%Y-%m-%d"));
        let mut candidate = PathBuf::from(&dated);
        let mut n = 0;
        while candidate.exists() {
            n += 1;
            candidate = PathBuf::from(format!("{}.{}", dated, n));
        }
        candidate
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_on(buf, Local::now().date_naive())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
