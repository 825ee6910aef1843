//! Shared logging setup for Lightbox binaries.
//!
//! Every binary logs to a size-rotated file under the logs directory and to
//! stderr. Pipeline failures are reported only here, as structured entries
//! keyed by artifact path.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "lightbox=info,lightbox_logging=info";
const VERBOSE_LOG_FILTER: &str = "lightbox=debug,lightbox_logging=debug";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by Lightbox binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Debug-level output on stderr.
    pub verbose: bool,
    /// Overrides the default `~/.lightbox/logs`.
    pub log_dir: Option<PathBuf>,
}

/// Initialize tracing with a rotating file writer and stderr output.
///
/// `RUST_LOG` takes precedence over the built-in filters.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => lightbox_protocol::paths::default_logs_dir(),
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;

    let writer = SharedRotatingWriter::open(&log_dir, config.app_name)
        .context("Failed to initialize rotating log writer")?;

    let base = if config.verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Size-rotated log file: `<name>.log`, `<name>.log.1` .. `<name>.log.N`.
struct RotatingFile {
    dir: PathBuf,
    stem: String,
    keep: usize,
    limit: u64,
    file: Option<File>,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &Path, name: &str, keep: usize, limit: u64) -> io::Result<Self> {
        let mut rf = Self {
            dir: dir.to_path_buf(),
            stem: file_stem(name),
            keep: keep.max(1),
            limit,
            file: None,
            written: 0,
        };
        rf.reopen()?;
        if rf.written > rf.limit {
            rf.rotate()?;
        }
        Ok(rf)
    }

    fn active(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn numbered(&self, n: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.stem, n))
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active())?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    /// With `keep == 1` there is nowhere to rotate to; the active file keeps growing.
    fn rotate(&mut self) -> io::Result<()> {
        let last = self.keep - 1;
        if last == 0 {
            return Ok(());
        }
        if let Some(mut old) = self.file.take() {
            let _ = old.flush();
        }

        // Shift .N-1 -> .N, dropping the oldest, then active -> .1
        let _ = fs::remove_file(self.numbered(last));
        for n in (1..last).rev() {
            let from = self.numbered(n);
            if from.exists() {
                fs::rename(&from, self.numbered(n + 1))?;
            }
        }
        let active = self.active();
        if active.exists() {
            fs::rename(active, self.numbered(1))?;
        }

        self.reopen()
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            self.rotate()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
struct SharedRotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl SharedRotatingWriter {
    fn open(dir: &Path, name: &str) -> Result<Self> {
        let file = RotatingFile::open(dir, name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file for {}", name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRotatingWriter {
    type Writer = SharedRotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for SharedRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .flush()
    }
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "lightbox".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_stem_replaces_unsafe_characters() {
        assert_eq!(file_stem("lightbox run"), "lightbox_run");
        assert_eq!(file_stem("a/b"), "a_b");
        assert_eq!(file_stem(""), "lightbox");
    }

    #[test]
    fn test_rotation_keeps_bounded_number_of_files() {
        let tmp = TempDir::new().unwrap();
        let mut rf = RotatingFile::open(tmp.path(), "test", 3, 16).unwrap();

        for _ in 0..10 {
            rf.write_all(b"0123456789abcdef").unwrap();
        }
        rf.flush().unwrap();

        assert!(tmp.path().join("test.log").exists());
        assert!(tmp.path().join("test.log.1").exists());
        assert!(tmp.path().join("test.log.2").exists());
        assert!(!tmp.path().join("test.log.3").exists());
    }

    #[test]
    fn test_reopen_appends_to_existing_file() {
        let tmp = TempDir::new().unwrap();
        {
            let mut rf = RotatingFile::open(tmp.path(), "app", 2, 1024).unwrap();
            rf.write_all(b"first\n").unwrap();
        }
        let mut rf = RotatingFile::open(tmp.path(), "app", 2, 1024).unwrap();
        rf.write_all(b"second\n").unwrap();
        rf.flush().unwrap();

        let content = fs::read_to_string(tmp.path().join("app.log")).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_single_file_keeps_appending_past_limit() {
        let tmp = TempDir::new().unwrap();
        let mut rf = RotatingFile::open(tmp.path(), "solo", 1, 8).unwrap();
        rf.write_all(b"0123456789\n").unwrap();
        rf.write_all(b"abcdefghij\n").unwrap();
        rf.flush().unwrap();

        let content = fs::read_to_string(tmp.path().join("solo.log")).unwrap();
        assert_eq!(content, "0123456789\nabcdefghij\n");
        assert!(!tmp.path().join("solo.log.1").exists());
    }
}
