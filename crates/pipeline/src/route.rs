//! Route group registry
//!
//! Several pipelines may export through the same HTTP path. The registry keeps,
//! per path, the ordered list of caches to aggregate when the path is scraped,
//! and publishes each new path exactly once to whoever installs HTTP routes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::CacheRef;

/// Renders the aggregated content of one path
pub type RouteHandler = Arc<dyn Fn() -> String + Send + Sync>;

/// A path to install on the HTTP server
#[derive(Clone)]
pub struct RouteRegistration {
    pub path: String,
    pub handler: RouteHandler,
}

impl fmt::Debug for RouteRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRegistration")
            .field("path", &self.path)
            .finish()
    }
}

/// Path to cache-group mapping shared by exporters and scrape handlers
pub struct RouteGroupRegistry {
    groups: RwLock<HashMap<String, Vec<CacheRef>>>,
    routes_tx: mpsc::Sender<RouteRegistration>,
}

impl RouteGroupRegistry {
    /// Create a registry and the receiving end of its route channel
    ///
    /// `capacity` bounds the number of unconsumed route registrations.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<RouteRegistration>) {
        let (routes_tx, routes_rx) = mpsc::channel(capacity.max(1));
        let registry = Arc::new(Self {
            groups: RwLock::new(HashMap::new()),
            routes_tx,
        });
        (registry, routes_rx)
    }

    /// Ensure a group exists for `path` and publish its route once
    ///
    /// Returns `true` when the path was seen for the first time.
    pub async fn register_http_route(self: &Arc<Self>, path: &str) -> bool {
        let created = {
            let mut groups = self.groups.write();
            if groups.contains_key(path) {
                false
            } else {
                groups.insert(path.to_string(), Vec::new());
                true
            }
        };

        if !created {
            return false;
        }

        let registry = Arc::clone(self);
        let route_path = path.to_string();
        let registration = RouteRegistration {
            path: path.to_string(),
            handler: Arc::new(move || registry.render(&route_path)),
        };

        if self.routes_tx.send(registration).await.is_err() {
            warn!(%path, "Route consumer is gone, route not installed");
        } else {
            info!(%path, "Published HTTP route");
        }
        true
    }

    /// Append a cache to the group of `path`
    pub fn add_pipeline_group(&self, path: &str, cache: CacheRef) {
        let mut groups = self.groups.write();
        let group = groups.entry(path.to_string()).or_default();
        group.push(cache);
        debug!(%path, members = group.len(), "Added cache to route group");
    }

    /// Remove a cache from the group of `path`
    ///
    /// Returns `true` if the cache was a member.
    pub fn delete_pipeline_group(&self, path: &str, cache: &CacheRef) -> bool {
        let mut groups = self.groups.write();
        let Some(group) = groups.get_mut(path) else {
            return false;
        };
        match group.iter().position(|member| member == cache) {
            Some(index) => {
                group.remove(index);
                debug!(%path, members = group.len(), "Removed cache from route group");
                true
            }
            None => false,
        }
    }

    /// Copy of the group of `path`, in insertion order
    pub fn get_pipeline_group(&self, path: &str) -> Vec<CacheRef> {
        self.groups.read().get(path).cloned().unwrap_or_default()
    }

    /// Registered paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.groups.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Render every cache of the group of `path`
    pub fn render(&self, path: &str) -> String {
        let mut out = String::new();
        for cache in self.get_pipeline_group(path) {
            cache.render_into(&mut out);
        }
        out
    }
}

impl fmt::Debug for RouteGroupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteGroupRegistry")
            .field("paths", &self.paths())
            .finish()
    }
}
