#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Event records and publishers used for telemetry and the conversation side channel.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::broadcast};
use uuid::Uuid;

/// Event carried by publishers and the side channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Random v4 id.
    pub id: String,
    /// Component that raised the event.
    pub source: String,
    /// Event type (e.g., `consultation.completed`).
    pub event_type: String,
    /// UTC creation time.
    pub timestamp: String,
    /// Event-specific JSON body.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Creates a record stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now().to_rfc3339(),
            payload,
        }
    }
}

/// Sends events somewhere.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Delivers one event.
    async fn publish(&self, event: EventRecord) -> Result<()>;
}

/// Receives events from a bus.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Returns a receiver that yields every event published after subscription.
    async fn subscribe(&self) -> Result<broadcast::Receiver<EventRecord>>;
}

/// Broadcast bus keeping a bounded backlog of recent events.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    capacity: usize,
    sender: broadcast::Sender<EventRecord>,
    backlog: Arc<Mutex<VecDeque<EventRecord>>>,
}

impl MemoryEventBus {
    /// Bus retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            capacity,
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Retained events of the given type.
    #[must_use]
    pub fn events_of(&self, event_type: &str) -> Vec<EventRecord> {
        self.backlog
            .lock()
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }
}

/// Appends events to a JSON-lines file.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Publisher for `path`; parent directories are created up front.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }
}

/// Publisher that POSTs each record as JSON to a remote collector.
#[derive(Debug, Clone)]
pub struct HttpEventPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEventPublisher {
    /// Creates a publisher targeting `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "event endpoint must be an http(s) url: {endpoint}"
        );
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// Target endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            backlog.push_back(event.clone());
            while backlog.len() > self.capacity {
                backlog.pop_front();
            }
        }
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<EventRecord>> {
        Ok(self.sender.subscribe())
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let data = serde_json::to_vec(&event)?;
        file.write_all(&data).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_event() -> EventRecord {
        EventRecord {
            id: "event-1".into(),
            source: "tester".into(),
            event_type: "unit.test".into(),
            timestamp: "2025-11-20T00:00:00Z".into(),
            payload: serde_json::json!({"value": 1}),
        }
    }

    #[tokio::test]
    async fn publishes_and_receives() {
        let bus = MemoryEventBus::new(16);
        let mut rx = bus.subscribe().await.unwrap();
        bus.publish(sample_event()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "unit.test");
    }

    #[tokio::test]
    async fn backlog_keeps_most_recent_events() {
        let bus = MemoryEventBus::new(2);
        for kind in ["a", "b", "c"] {
            bus.publish(EventRecord::new("tester", kind, serde_json::Value::Null))
                .await
                .unwrap();
        }
        let kinds: Vec<_> = bus.snapshot().into_iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec!["b", "c"]);
        assert_eq!(bus.events_of("c").len(), 1);
    }

    #[tokio::test]
    async fn file_publisher_writes_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events/events.log");
        let publisher = FileEventPublisher::new(&path).unwrap();
        publisher.publish(sample_event()).await.unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("unit.test"));
    }

    #[test]
    fn new_records_get_unique_ids() {
        let a = EventRecord::new("m", "x", serde_json::Value::Null);
        let b = EventRecord::new("m", "x", serde_json::Value::Null);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("evt-"));
    }

    #[test]
    fn http_publisher_rejects_non_http_endpoints() {
        assert!(HttpEventPublisher::new("ftp://example", Duration::from_secs(1)).is_err());
        let publisher =
            HttpEventPublisher::new("http://127.0.0.1:9/collect", Duration::from_secs(1)).unwrap();
        assert_eq!(publisher.endpoint(), "http://127.0.0.1:9/collect");
    }
}
