use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};
use tokio::runtime::Handle;

/// Builder for memory telemetry sinks.
pub struct MemoryTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    log_sink: Option<Arc<dyn LogSink>>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl MemoryTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            log_sink: None,
            event_publisher: None,
        }
    }

    /// Writes JSON lines to a file at `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Uses an existing sink instead of a file.
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<MemoryTelemetry> {
        let sink = match (self.log_sink, self.log_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => Some(Arc::new(JsonLogger::new(path)?) as Arc<dyn LogSink>),
            (None, None) => None,
        };
        Ok(MemoryTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sink,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared by the memory store.
#[derive(Clone)]
pub struct MemoryTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for MemoryTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    sink: Option<Arc<dyn LogSink>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl MemoryTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> MemoryTelemetryBuilder {
        MemoryTelemetryBuilder::new(module)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(sink) = &self.inner.sink {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            sink.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event on the bus; requires a running tokio runtime.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        let Some(publisher) = &self.inner.publisher else {
            return Ok(());
        };
        let handle =
            Handle::try_current().map_err(|_| anyhow!("no tokio runtime for event {event_type}"))?;
        let publisher = Arc::clone(publisher);
        let record = EventRecord::new(&self.inner.module, event_type, payload);
        handle.spawn(async move {
            if let Err(err) = publisher.publish(record).await {
                eprintln!("memory telemetry publish failed: {err:?}");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use shared_logging::MemoryLogSink;
    use tempfile::tempdir;

    #[test]
    fn writes_log_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("memory.log");
        let telemetry = MemoryTelemetry::builder("memory")
            .log_path(&path)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "memory.stored", json!({ "tier": "working" }))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("memory.stored"));
    }

    #[test]
    fn event_without_runtime_is_an_error() {
        let telemetry = MemoryTelemetry::builder("memory")
            .event_publisher(Arc::new(MemoryEventBus::new(4)))
            .build()
            .unwrap();
        assert!(telemetry.event("memory.stored", json!({})).is_err());
    }

    #[tokio::test]
    async fn event_reaches_bus() {
        let bus = Arc::new(MemoryEventBus::new(4));
        let sink = Arc::new(MemoryLogSink::new(8));
        let telemetry = MemoryTelemetry::builder("memory")
            .log_sink(sink.clone())
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry.event("memory.promoted", json!({ "n": 1 })).unwrap();
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.events_of("memory.promoted").len(), 1);
        telemetry.log(LogLevel::Debug, "x", Value::Null).unwrap();
        assert!(sink.contains("x"));
    }
}
