// src/logging.rs

//! Log file maintenance.
//!
//! The binary mirrors log output into a file opened in append mode. That
//! file is emptied every `cleanup_interval_hours`, or sooner once it passes
//! the size cap; a marker line records when and how much was dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::Result;

const SECS_PER_HOUR: f64 = 3600.0;

/// Cleanup timing, reported in health snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogCleanupStatus {
    pub interval_hours: f64,
    pub hours_since_cleanup: f64,
    pub hours_until_cleanup: f64,
    pub cleanup_due: bool,
}

/// Periodically truncates the log file.
#[derive(Debug)]
pub struct LogFileManager {
    path: PathBuf,
    interval: Duration,
    max_bytes: Option<u64>,
    last_cleanup: Instant,
}

impl LogFileManager {
    pub fn new(path: impl Into<PathBuf>, cleanup_interval_hours: u64) -> Self {
        Self {
            path: path.into(),
            interval: Duration::from_secs(cleanup_interval_hours * 3600),
            max_bytes: None,
            last_cleanup: Instant::now(),
        }
    }

    /// Also clean up once the file reaches `max_bytes`. Zero disables the cap.
    pub fn with_max_size(mut self, max_bytes: u64) -> Self {
        self.max_bytes = (max_bytes > 0).then_some(max_bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn interval_elapsed(&self) -> bool {
        self.last_cleanup.elapsed() >= self.interval
    }

    /// Interval elapsed, or the file has reached the size cap.
    pub async fn should_cleanup(&self) -> bool {
        if self.interval_elapsed() {
            return true;
        }
        let Some(max_bytes) = self.max_bytes else {
            return false;
        };
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() >= max_bytes,
            Err(_) => false,
        }
    }

    /// Empty the log file, leaving only a marker. Returns the dropped size in bytes.
    pub async fn cleanup(&mut self) -> Result<u64> {
        let previous_size = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let rule = "=".repeat(80);
        let marker = format!(
            "\n{rule}\nLOG FILE CLEANUP PERFORMED: {}\nPrevious log size: {:.2} MB\nCleanup interval: {:.0} hours\n{rule}\n\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            previous_size as f64 / (1024.0 * 1024.0),
            self.interval.as_secs_f64() / SECS_PER_HOUR,
        );
        tokio::fs::write(&self.path, marker).await?;

        self.last_cleanup = Instant::now();
        log::debug!(
            "Log file cleanup completed, freed {:.2} MB",
            previous_size as f64 / (1024.0 * 1024.0)
        );
        Ok(previous_size)
    }

    pub fn status(&self) -> LogCleanupStatus {
        let since = self.last_cleanup.elapsed().as_secs_f64();
        let interval = self.interval.as_secs_f64();
        LogCleanupStatus {
            interval_hours: interval / SECS_PER_HOUR,
            hours_since_cleanup: since / SECS_PER_HOUR,
            hours_until_cleanup: (interval - since).max(0.0) / SECS_PER_HOUR,
            cleanup_due: self.interval_elapsed(),
        }
    }
}

/// Open (or create) a log file for appending.
pub fn open_log_file(path: impl AsRef<Path>) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Writer that duplicates log output to stderr and a file.
#[derive(Debug)]
pub struct TeeWriter {
    file: File,
}

impl TeeWriter {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_due_after_interval() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = LogFileManager::new(dir.path().join("adsb.log"), 48);

        assert!(!manager.should_cleanup().await);
        tokio::time::advance(Duration::from_secs(47 * 3600)).await;
        assert!(!manager.should_cleanup().await);
        assert!((manager.status().hours_until_cleanup - 1.0).abs() < 0.01);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(manager.should_cleanup().await);
        assert!(manager.status().cleanup_due);
        assert_eq!(manager.status().hours_until_cleanup, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_truncates_and_resets() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("adsb.log");
        std::fs::write(&path, "x".repeat(4096)).unwrap();

        let mut manager = LogFileManager::new(&path, 1);
        tokio::time::advance(Duration::from_secs(3600)).await;

        assert_eq!(manager.cleanup().await.unwrap(), 4096);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("LOG FILE CLEANUP PERFORMED"));
        assert!(!content.contains("xxxx"));
        assert!(!manager.should_cleanup().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_due_at_size_cap() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("adsb.log");
        std::fs::write(&path, "x".repeat(1023)).unwrap();

        let manager = LogFileManager::new(&path, 48).with_max_size(1024);
        assert!(!manager.should_cleanup().await);

        std::fs::write(&path, "x".repeat(1024)).unwrap();
        assert!(manager.should_cleanup().await);
        assert!(!manager.status().cleanup_due);

        let uncapped = LogFileManager::new(&path, 48).with_max_size(0);
        assert!(!uncapped.should_cleanup().await);
    }

    #[tokio::test]
    async fn test_cleanup_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut manager = LogFileManager::new(dir.path().join("absent.log"), 1);
        assert_eq!(manager.cleanup().await.unwrap(), 0);
        assert!(manager.path().exists());
    }

    #[test]
    fn test_tee_writer_appends_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("adsb.log");
        std::fs::write(&path, "first\n").unwrap();

        let mut writer = TeeWriter::new(open_log_file(&path).unwrap());
        writer.write_all(b"second\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
