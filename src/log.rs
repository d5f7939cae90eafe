//! Diagnostic log for a collection run
//!
//! Every component receives a `&RunLog` explicitly. Records go to a log file
//! that outlives the run (it is uploaded afterwards and its path is shown to the
//! user on failure) and are mirrored as `tracing` events.

use crate::error::Result;
use chrono::Local;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use termcolor::{BufferWriter, ColorChoice};

const LOG_PREFIX: &str = "signing-files-collector-log-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        })
    }
}

pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
    console: bool,
}

impl RunLog {
    /// Create a new log file with a random name in `dir`
    pub fn create_in(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (file, path) = tempfile::Builder::new()
            .prefix(LOG_PREFIX)
            .suffix(".log")
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| e.error)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            console: true,
        })
    }

    /// Stop echoing `announce` messages to stdout
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.console = false;
        self
    }

    /// Whether user-facing output goes to the terminal
    pub fn is_console(&self) -> bool {
        self.console
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.record(Level::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.record(Level::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.record(Level::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.record(Level::Error, message.as_ref());
    }

    /// Record at info level and echo to stdout
    pub fn announce(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.record(Level::Info, message);

        if self.console {
            let bufwtr = BufferWriter::stdout(ColorChoice::Auto);
            let mut buffer = bufwtr.buffer();
            let _ = writeln!(
                &mut buffer,
                "{} INFO {message}",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            let _ = bufwtr.print(&buffer);
        }
    }

    /// Flush and read back everything written so far
    pub async fn contents(&self) -> Result<Vec<u8>> {
        {
            let mut file = match self.file.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            file.flush()?;
        }
        Ok(tokio::fs::read(&self.path).await?)
    }

    fn record(&self, level: Level, message: &str) {
        match level {
            Level::Debug => tracing::debug!(target: "collector", "{message}"),
            Level::Info => tracing::info!(target: "collector", "{message}"),
            Level::Warn => tracing::warn!(target: "collector", "{message}"),
            Level::Error => tracing::error!(target: "collector", "{message}"),
        }

        let line = format!(
            "{} {level} {message}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );

        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A failing log write must not fail the run
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!(target: "collector", "Failed to write diagnostic log: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_are_persisted_with_level_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::create_in(dir.path()).unwrap().quiet();

        log.debug("matching profiles");
        log.error("upload failed");

        let contents = String::from_utf8(log.contents().await.unwrap()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" DEBUG matching profiles"));
        assert!(lines[1].ends_with(" ERROR upload failed"));
        // "YYYY-MM-DD HH:MM:SS " prefix
        assert_eq!(lines[0].as_bytes()[4], b'-');
        assert_eq!(lines[0].as_bytes()[19], b' ');
    }

    #[test]
    fn test_log_file_survives_handle() {
        let dir = TempDir::new().unwrap();
        let path = {
            let log = RunLog::create_in(dir.path()).unwrap().quiet();
            log.info("hello");
            log.path().to_path_buf()
        };

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(LOG_PREFIX));
        assert!(name.ends_with(".log"));
        assert!(path.exists());
    }
}
