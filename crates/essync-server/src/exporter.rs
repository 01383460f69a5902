//! Error log freshness check behind `/exporter`
//!
//! Reports `essync_error_new{} 1` when the error log has received lines in
//! the last five minutes, judged by the older of its last two lines.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

/// Format of the timestamp every log line starts with
pub const LINE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const LINE_TIMESTAMP_LEN: usize = 19;
const TAIL_WINDOW: u64 = 16 * 1024;

pub const METRIC_NAME: &str = "essync_error_new";

/// Checks how recent the tail of the error log is
#[derive(Debug, Clone)]
pub struct ErrorLogMonitor {
    path: PathBuf,
    window: Duration,
}

impl ErrorLogMonitor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            window: Duration::from_secs(300),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether recent errors were logged as of `now`. A missing, empty or
    /// unparsable log is not fresh.
    pub fn is_fresh(&self, now: DateTime<Local>) -> bool {
        let lines = match tail_lines(&self.path, 2) {
            Ok(lines) => lines,
            Err(_) => return false,
        };

        lines
            .first()
            .and_then(|line| line_timestamp(line))
            .map(|at| (now - at).num_seconds() < self.window.as_secs() as i64)
            .unwrap_or(false)
    }

    /// Exporter body at `now`
    pub fn render(&self, now: DateTime<Local>) -> String {
        format!("{}{{}} {}\n", METRIC_NAME, u8::from(self.is_fresh(now)))
    }
}

/// Local timestamp at the start of a log line
fn line_timestamp(line: &str) -> Option<DateTime<Local>> {
    let prefix = line.get(..LINE_TIMESTAMP_LEN)?;
    let naive = NaiveDateTime::parse_from_str(prefix, LINE_TIMESTAMP_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

/// Last `n` non-empty lines of a file, oldest first
fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);

    let mut lines: Vec<&str> = text.lines().collect();
    if start > 0 && !lines.is_empty() {
        // First line is cut by the window
        lines.remove(0);
    }

    let lines: Vec<String> = lines
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    let skip = lines.len().saturating_sub(n);
    Ok(lines.into_iter().skip(skip).collect())
}
