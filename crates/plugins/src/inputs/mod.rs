//! Built-in sources

mod host;
mod static_input;

pub use host::{HostConfig, HostSource};
pub use static_input::{MessageTemplate, StaticConfig, StaticSource};

/// Default tick for interval sources
pub(crate) const DEFAULT_INTERVAL_MS: u64 = 10_000;

pub(crate) fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}
