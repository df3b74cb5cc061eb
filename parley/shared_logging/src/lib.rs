#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines logging shared by the consultation and memory crates.

use std::{
    collections::VecDeque,
    fmt,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Record severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Fine-grained tracing.
    Debug,
    /// Normal progress.
    Info,
    /// Degraded but recovered.
    Warn,
    /// Failed.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// One JSON-lines log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// UTC time the record was created.
    pub timestamp: DateTime<Utc>,
    /// Crate or component that wrote the record.
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Message, usually a dotted event name.
    pub message: String,
    /// Arbitrary JSON fields attached to the record.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record with the provided info.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attaches metadata. Non-object values are stored under `value`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        match metadata {
            serde_json::Value::Object(map) => self.metadata = map,
            serde_json::Value::Null => {}
            other => {
                self.metadata.insert("value".into(), other);
            }
        }
        self
    }
}

/// Destination for structured log records.
pub trait LogSink: Send + Sync {
    /// Writes a record. Records below the sink's minimum level are skipped.
    fn log(&self, record: &LogRecord) -> Result<()>;
}

/// Append-only JSON-lines file sink.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    min_level: LogLevel,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            min_level: LogLevel::Debug,
            writer: Mutex::new(file),
        })
    }

    /// Drops records below `level`.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// File the logger appends to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for JsonLogger {
    fn log(&self, record: &LogRecord) -> Result<()> {
        if record.level < self.min_level {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// In-memory sink retaining the most recent records.
#[derive(Debug)]
pub struct MemoryLogSink {
    capacity: usize,
    min_level: LogLevel,
    records: Mutex<VecDeque<LogRecord>>,
}

impl MemoryLogSink {
    /// Creates a sink keeping at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            min_level: LogLevel::Debug,
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Drops records below `level`.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Snapshot of retained records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Returns true when any retained record carries `message`.
    #[must_use]
    pub fn contains(&self, message: &str) -> bool {
        self.records.lock().iter().any(|r| r.message == message)
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, record: &LogRecord) -> Result<()> {
        if record.level < self.min_level {
            return Ok(());
        }
        let mut records = self.records.lock();
        records.push_back(record.clone());
        while records.len() > self.capacity {
            records.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_json_lines() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("nested/test.log")).unwrap();
        logger
            .log(
                &LogRecord::new("consultation", LogLevel::Info, "hello")
                    .with_metadata(json!({ "specialists": 3 })),
            )
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("\"message\":\"hello\""));
        assert!(content.contains("\"specialists\":3"));
        assert!(content.contains("\"level\":\"INFO\""));
    }

    #[test]
    fn min_level_filters_records() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("warn.log"))
            .unwrap()
            .with_min_level(LogLevel::Warn);
        logger
            .log(&LogRecord::new("m", LogLevel::Debug, "quiet"))
            .unwrap();
        logger
            .log(&LogRecord::new("m", LogLevel::Error, "loud"))
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(!content.contains("quiet"));
        assert!(content.contains("loud"));
    }

    #[test]
    fn memory_sink_is_bounded() {
        let sink = MemoryLogSink::new(2);
        for message in ["a", "b", "c"] {
            sink.log(&LogRecord::new("m", LogLevel::Info, message))
                .unwrap();
        }
        let snapshot = sink.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].message, "b");
        assert!(sink.contains("c"));
        assert!(!sink.contains("a"));
    }

    #[test]
    fn scalar_metadata_is_wrapped() {
        let record = LogRecord::new("m", LogLevel::Info, "x").with_metadata(json!(7));
        assert_eq!(record.metadata.get("value"), Some(&json!(7)));
    }
}
