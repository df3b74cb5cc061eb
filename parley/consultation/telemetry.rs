use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};
use tokio::runtime::Handle;

/// Builder for consultation telemetry sinks.
pub struct ConsultationTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    log_sink: Option<Arc<dyn LogSink>>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl ConsultationTelemetryBuilder {
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
    pub fn build(self) -> Result<ConsultationTelemetry> {
        let sink = match (self.log_sink, self.log_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => Some(Arc::new(JsonLogger::new(path)?) as Arc<dyn LogSink>),
            (None, None) => None,
        };
        Ok(ConsultationTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sink,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared by the pipeline stages and the conversation runtime.
#[derive(Clone)]
pub struct ConsultationTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for ConsultationTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsultationTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    sink: Option<Arc<dyn LogSink>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl ConsultationTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> ConsultationTelemetryBuilder {
        ConsultationTelemetryBuilder::new(module)
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
                eprintln!("consultation telemetry publish failed: {err:?}");
            }
        });
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_logging::MemoryLogSink;

    #[test]
    fn sink_level_filters_debug_records() {
        let sink = Arc::new(MemoryLogSink::new(8).with_min_level(LogLevel::Warn));
        let telemetry = ConsultationTelemetry::builder("consultation")
            .log_sink(sink.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Debug, "consultation.cache.miss", json!({}))
            .unwrap();
        telemetry
            .log(
                LogLevel::Warn,
                "consultation.synthesis.fallback",
                json!({ "failure": "synthesis_timeout" }),
            )
            .unwrap();
        let records = sink.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "consultation.synthesis.fallback");
    }

    #[test]
    fn events_are_optional() {
        let telemetry = ConsultationTelemetry::builder("consultation").build().unwrap();
        assert!(telemetry.event("consultation.completed", json!({})).is_ok());
        assert!(format!("{telemetry:?}").contains("consultation"));
    }
}
