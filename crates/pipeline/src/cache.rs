//! Latest-value metric cache used by pull-style exporters

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::message::{Message, MessageKind};

/// Latest sample per series, written by one pipeline's exporter
#[derive(Debug, Default)]
pub struct MetricCache {
    entries: RwLock<BTreeMap<String, Message>>,
}

impl MetricCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record metric samples, replacing older samples of the same series
    ///
    /// Log messages and metrics without a value are ignored.
    pub fn update(&self, batch: &[Message]) {
        let mut entries = self.entries.write();
        for message in batch {
            if message.kind == MessageKind::Metric && message.value.is_some() {
                entries.insert(message.series_key(), message.clone());
            }
        }
    }

    /// Copy of the cached samples, ordered by series key
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.read().values().cloned().collect()
    }

    /// Number of cached series
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached series
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Append `name{k="v",...} value` lines for every cached series
    pub fn render_into(&self, out: &mut String) {
        for message in self.entries.read().values() {
            let Some(value) = message.value else {
                continue;
            };
            out.push_str(&message.name);
            if !message.tags.is_empty() {
                out.push('{');
                for (i, (k, v)) in message.tags.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{}=\"{}\"", k, v.replace('"', "\\\""));
                }
                out.push('}');
            }
            let _ = writeln!(out, " {}", value);
        }
    }
}

/// Shared handle to a [`MetricCache`] compared by identity
#[derive(Debug, Clone, Default)]
pub struct CacheRef(Arc<MetricCache>);

impl CacheRef {
    /// Create a handle to a new empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartialEq for CacheRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CacheRef {}

impl Deref for CacheRef {
    type Target = MetricCache;

    fn deref(&self) -> &MetricCache {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_keeps_latest_per_series() {
        let cache = MetricCache::new();
        cache.update(&[
            Message::metric("connections", 1.0).with_tag("db", "a"),
            Message::metric("connections", 2.0).with_tag("db", "b"),
        ]);
        cache.update(&[Message::metric("connections", 5.0).with_tag("db", "a")]);

        assert_eq!(cache.len(), 2);
        let values: Vec<f64> = cache.snapshot().iter().filter_map(|m| m.value).collect();
        assert_eq!(values, vec![5.0, 2.0]);
    }

    #[test]
    fn test_logs_are_ignored() {
        let cache = MetricCache::new();
        cache.update(&[Message::log("error_log", "disk full")]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_render() {
        let cache = MetricCache::new();
        cache.update(&[
            Message::metric("up", 1.0),
            Message::metric("qps", 12.5)
                .with_tag("node", "db-1")
                .with_tag("db", "main"),
        ]);

        let mut out = String::new();
        cache.render_into(&mut out);
        assert_eq!(out, "qps{db=\"main\",node=\"db-1\"} 12.5\nup 1\n");
    }

    #[test]
    fn test_cache_ref_identity() {
        let a = CacheRef::new();
        let b = CacheRef::new();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
