// Logging setup
//
// Configure via environment variables:
// - RUST_LOG or LOG_LEVEL: log filter (default: "nodewatch=info")
// - LOG_FORMAT: "json" for JSON lines, anything else for human-readable output

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "nodewatch=info";

/// Configuration for the log subscriber
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Log filter (e.g., "info", "nodewatch=debug,tower_http=debug")
    pub log_filter: Option<String>,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            log_filter: lookup("RUST_LOG").or_else(|| lookup("LOG_LEVEL")),
            json: lookup("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    /// Filter directives in effect
    ///
    /// A bare level such as `debug` applies to the agent crates only; targets
    /// match by prefix, so `nodewatch` covers every `nodewatch_*` crate.
    pub fn filter_directives(&self) -> String {
        match self.log_filter.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_FILTER.to_string(),
            Some(level) if is_bare_level(level) => format!("nodewatch={}", level.to_lowercase()),
            Some(filter) => filter.to_string(),
        }
    }
}

fn is_bare_level(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    )
}

/// Install the global subscriber
///
/// Call once, early in `main`.
pub fn init_telemetry(config: TelemetryConfig) {
    let filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_filter() {
        let config = TelemetryConfig::from_lookup(lookup(&[]));
        assert_eq!(config.filter_directives(), "nodewatch=info");
        assert!(!config.json);
    }

    #[test]
    fn test_rust_log_wins_over_log_level() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("RUST_LOG", "tower_http=debug"),
            ("LOG_LEVEL", "warn"),
        ]));
        assert_eq!(config.filter_directives(), "tower_http=debug");
    }

    #[test]
    fn test_bare_level_scopes_to_agent_crates() {
        let config = TelemetryConfig::from_lookup(lookup(&[("LOG_LEVEL", "debug")]));
        assert_eq!(config.filter_directives(), "nodewatch=debug");
    }

    #[test]
    fn test_json_format() {
        let config = TelemetryConfig::from_lookup(lookup(&[("LOG_FORMAT", "JSON")]));
        assert!(config.json);
    }
}
