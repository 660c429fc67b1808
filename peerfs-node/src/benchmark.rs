//! Append-only benchmark log (`benchmarks.txt`), one line per measured transfer.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;

pub const DEFAULT_LOG_FILE: &str = "benchmarks.txt";

#[derive(Debug, Clone)]
pub struct BenchmarkEntry {
    pub timestamp: DateTime<Local>,
    pub test_name: String,
    pub duration: Duration,
    pub notes: String,
}

impl BenchmarkEntry {
    pub fn now(test_name: impl Into<String>, duration: Duration, notes: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            test_name: test_name.into(),
            duration,
            notes: notes.into(),
        }
    }

    /// `[2006-01-02 15:04:05] name | Duration: 1.5s | Notes: ...`
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {:<25} | Duration: {:<15} | Notes: {}\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.test_name,
            format!("{:?}", self.duration),
            self.notes,
        )
    }
}

/// Throughput in MB/s (decimal megabytes).
pub fn megabytes_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / 1_000_000.0 / secs
    } else {
        0.0
    }
}

pub async fn append(path: &Path, entry: &BenchmarkEntry) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(entry.to_line().as_bytes()).await?;
    file.flush().await
}
