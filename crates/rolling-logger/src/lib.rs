//! Rolling Logger
//!
//! Installs a `tracing-subscriber` fmt subscriber that writes to a
//! size-rotated file in a log directory and keeps the most recent lines in
//! memory. `log` records from library crates are bridged into it.
//!
//! ```no_run
//! rolling_logger::init_logger("/tmp/logs", "Shotline").unwrap();
//! let _ = rolling_logger::info("store opened");
//! ```

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tracing_subscriber::fmt::MakeWriter;

/// Rotation and buffer limits
#[derive(Debug, Clone, Copy)]
pub struct LoggerConfig {
    /// Rotate once the active file would grow past this many bytes
    pub max_bytes: u64,
    /// Rotated files kept next to the active one
    pub max_files: usize,
    /// Lines kept in memory for `recent_lines`
    pub buffer_lines: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            max_files: 3,
            buffer_lines: 500,
        }
    }
}

struct RollingState {
    dir: PathBuf,
    app_name: String,
    config: LoggerConfig,
    file: Option<File>,
    written: u64,
    recent: VecDeque<String>,
}

impl RollingState {
    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.app_name))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.app_name, index))
    }

    fn open(&mut self) -> io::Result<()> {
        let path = self.active_path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    /// Shift `app.log.N` up by one, dropping the oldest, and start a new file
    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;
        if self.config.max_files == 0 {
            fs::remove_file(self.active_path())?;
            return self.open();
        }
        let oldest = self.rotated_path(self.config.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.config.max_files).rev() {
            let from = self.rotated_path(index);
            if from.exists() {
                fs::rename(&from, self.rotated_path(index + 1))?;
            }
        }
        fs::rename(self.active_path(), self.rotated_path(1))?;
        self.open()
    }

    fn remember(&mut self, buf: &[u8]) {
        if self.config.buffer_lines == 0 {
            return;
        }
        for line in String::from_utf8_lossy(buf).lines() {
            if line.trim().is_empty() {
                continue;
            }
            if self.recent.len() == self.config.buffer_lines {
                self.recent.pop_front();
            }
            self.recent.push_back(line.to_string());
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.written > 0 && self.written + buf.len() as u64 > self.config.max_bytes {
            self.rotate()?;
        }
        if self.file.is_none() {
            self.open()?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
            self.written += buf.len() as u64;
        }
        self.remember(buf);
        Ok(())
    }
}

/// `MakeWriter` handing out handles to one rotating log file
#[derive(Clone)]
pub struct RollingWriter {
    state: Arc<Mutex<RollingState>>,
}

impl RollingWriter {
    pub fn new(dir: impl AsRef<Path>, app_name: &str, config: LoggerConfig) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut state = RollingState {
            dir,
            app_name: app_name.to_string(),
            config,
            file: None,
            written: 0,
            recent: VecDeque::with_capacity(config.buffer_lines),
        };
        state.open()?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Path of the file currently written to
    pub fn path(&self) -> PathBuf {
        match self.state.lock() {
            Ok(state) => state.active_path(),
            Err(poisoned) => poisoned.into_inner().active_path(),
        }
    }

    pub fn recent_lines(&self) -> Vec<String> {
        match self.state.lock() {
            Ok(state) => state.recent.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().recent.iter().cloned().collect(),
        }
    }
}

/// Handle produced per event by `RollingWriter`
pub struct RollingHandle {
    state: Arc<Mutex<RollingState>>,
}

impl Write for RollingHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer poisoned"))?;
        state.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer poisoned"))?;
        match state.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RollingWriter {
    type Writer = RollingHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RollingHandle {
            state: self.state.clone(),
        }
    }
}

// ========================
// Global logger
// ========================

static LOGGER: OnceLock<RollingWriter> = OnceLock::new();

/// Install the global subscriber writing to `<dir>/<app_name>.log`
pub fn init_logger(dir: impl AsRef<Path>, app_name: &str) -> Result<(), String> {
    init_logger_with(dir, app_name, LoggerConfig::default())
}

pub fn init_logger_with(dir: impl AsRef<Path>, app_name: &str, config: LoggerConfig) -> Result<(), String> {
    if LOGGER.get().is_some() {
        return Err("Logger already initialized".to_string());
    }
    let writer = RollingWriter::new(dir, app_name, config).map_err(|e| format!("Failed to open log file: {}", e))?;

    tracing_subscriber::fmt()
        .with_writer(writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .try_init()
        .map_err(|e| format!("Failed to install subscriber: {}", e))?;

    LOGGER
        .set(writer)
        .map_err(|_| "Logger already initialized".to_string())?;
    // Goes through the log bridge like every library record
    log::info!(
        "{} logging started at {}",
        app_name,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

fn ensure_initialized() -> Result<(), String> {
    match LOGGER.get() {
        Some(_) => Ok(()),
        None => Err("Logger not initialized".to_string()),
    }
}

pub fn info(msg: &str) -> Result<(), String> {
    ensure_initialized()?;
    tracing::info!("{}", msg);
    Ok(())
}

pub fn error(msg: &str) -> Result<(), String> {
    ensure_initialized()?;
    tracing::error!("{}", msg);
    Ok(())
}

/// Most recent formatted lines, oldest first. Empty before `init_logger`.
pub fn recent_lines() -> Vec<String> {
    LOGGER.get().map(|w| w.recent_lines()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(max_bytes: u64, max_files: usize, buffer_lines: usize) -> LoggerConfig {
        LoggerConfig {
            max_bytes,
            max_files,
            buffer_lines,
        }
    }

    #[test]
    fn test_writes_to_app_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RollingWriter::new(dir.path(), "Shotline", LoggerConfig::default()).unwrap();

        writer.make_writer().write_all(b"first line\n").unwrap();
        writer.make_writer().write_all(b"second line\n").unwrap();

        let content = fs::read_to_string(dir.path().join("Shotline.log")).unwrap();
        assert_eq!(content, "first line\nsecond line\n");
        assert_eq!(writer.path(), dir.path().join("Shotline.log"));
    }

    #[test]
    fn test_rotates_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RollingWriter::new(dir.path(), "app", small(16, 2, 10)).unwrap();

        for line in ["aaaaaaaaaa\n", "bbbbbbbbbb\n", "cccccccccc\n", "dddddddddd\n"] {
            writer.make_writer().write_all(line.as_bytes()).unwrap();
        }

        let read = |name: &str| fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("app.log"), "dddddddddd\n");
        assert_eq!(read("app.log.1"), "cccccccccc\n");
        assert_eq!(read("app.log.2"), "bbbbbbbbbb\n");
        // only max_files rotated files are kept
        assert!(!dir.path().join("app.log.3").exists());
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        {
            let writer = RollingWriter::new(dir.path(), "app", LoggerConfig::default()).unwrap();
            writer.make_writer().write_all(b"before\n").unwrap();
        }
        let writer = RollingWriter::new(dir.path(), "app", LoggerConfig::default()).unwrap();
        writer.make_writer().write_all(b"after\n").unwrap();

        let content = fs::read_to_string(dir.path().join("app.log")).unwrap();
        assert_eq!(content, "before\nafter\n");
    }

    #[test]
    fn test_ring_buffer_keeps_latest_lines() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RollingWriter::new(dir.path(), "app", small(1024, 1, 2)).unwrap();

        writer.make_writer().write_all(b"one\ntwo\n").unwrap();
        writer.make_writer().write_all(b"three\n\n").unwrap();

        assert_eq!(writer.recent_lines(), vec!["two".to_string(), "three".to_string()]);
    }

    #[test]
    fn test_helpers_require_init() {
        if LOGGER.get().is_none() {
            assert!(info("nobody listening").is_err());
            assert!(recent_lines().is_empty());
        }
    }
}
