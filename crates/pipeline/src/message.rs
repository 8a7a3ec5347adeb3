//! Message model carried through pipelines

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Capacity of each per-source stream
pub const SOURCE_CHANNEL_CAPACITY: usize = 100;

/// Capacity of intermediate processor streams and the merged stream
pub const STAGE_CHANNEL_CAPACITY: usize = 100;

/// Capacity of the stream consumed by the sink
pub const SINK_CHANNEL_CAPACITY: usize = 500;

/// Kind of telemetry a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Metric,
    Log,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric => write!(f, "metric"),
            Self::Log => write!(f, "log"),
        }
    }
}

/// A single metric sample or log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a metric sample
    pub fn metric(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: MessageKind::Metric,
            value: Some(value),
            body: None,
            tags: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a log line
    pub fn log(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MessageKind::Log,
            value: None,
            body: Some(body.into()),
            tags: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Identity of the series this message belongs to (name plus sorted tags)
    pub fn series_key(&self) -> String {
        let mut key = self.name.clone();
        for (k, v) in &self.tags {
            key.push(',');
            key.push_str(k);
            key.push('=');
            key.push_str(v);
        }
        key
    }
}

/// Unit of transfer between pipeline stages
pub type MessageBatch = Vec<Message>;

/// Writing half of a pipeline stream
pub type BatchSender = mpsc::Sender<MessageBatch>;

/// Reading half of a pipeline stream
pub type BatchReceiver = mpsc::Receiver<MessageBatch>;
