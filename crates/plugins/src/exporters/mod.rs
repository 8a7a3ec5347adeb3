//! Built-in pull-style exporters

mod prometheus;

pub use prometheus::{PrometheusConfig, PrometheusExporter};
