//! Event loop configuration.
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via [`Builder`] methods
//! 2. **Environment variables**: values from `YOT_LOOP_*` env vars, applied by [`Builder::from_env`]
//! 3. **Defaults**: [`LoopConfig::default()`]
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `YOT_LOOP_EVENTS_CAPACITY` | `usize` | `events_capacity` |
//! | `YOT_LOOP_METRICS_PORT` | `u16` | `metrics_port` |

use tracing::info;

use crate::error::{BuildError, ConfigError};
use crate::runtime::EventLoop;

/// Environment variable name for the readiness event buffer capacity.
pub const ENV_EVENTS_CAPACITY: &str = "YOT_LOOP_EVENTS_CAPACITY";
/// Environment variable name for the Prometheus exporter port.
pub const ENV_METRICS_PORT: &str = "YOT_LOOP_METRICS_PORT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// How many readiness events one poll can report.
    pub events_capacity: usize,
    /// When set, a Prometheus exporter serves metrics on `127.0.0.1:<port>`.
    pub metrics_port: Option<u16>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            events_capacity: 1024,
            metrics_port: None,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.events_capacity == 0 {
            return Err(ConfigError::ZeroEventsCapacity);
        }
        Ok(())
    }
}

/// Apply environment variable overrides to a [`LoopConfig`].
///
/// Only variables that are set are applied; a set but unparseable value is an error.
pub fn apply_env_overrides(config: &mut LoopConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, |var| std::env::var(var).ok())
}

fn apply_overrides_from(
    config: &mut LoopConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(val) = lookup(ENV_EVENTS_CAPACITY) {
        config.events_capacity = parse(ENV_EVENTS_CAPACITY, &val)?;
    }
    if let Some(val) = lookup(ENV_METRICS_PORT) {
        config.metrics_port = Some(parse(ENV_METRICS_PORT, &val)?);
    }
    Ok(())
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Configured construction of an [`EventLoop`].
///
/// # Examples
///
/// ```ignore
/// let event_loop = Builder::from_env()?.events_capacity(256).build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    config: LoopConfig,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the defaults with `YOT_LOOP_*` overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = LoopConfig::default();
        apply_env_overrides(&mut config)?;
        Ok(Self { config })
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.config.events_capacity = capacity;
        self
    }

    /// Serve Prometheus metrics on `127.0.0.1:<port>`.
    pub fn metrics_port(mut self, port: u16) -> Self {
        self.config.metrics_port = Some(port);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Validates the configuration and creates the loop.
    ///
    /// The metrics exporter is process-wide; installing it twice fails.
    pub fn build(self) -> Result<EventLoop, BuildError> {
        self.config.validate()?;

        if let Some(port) = self.config.metrics_port {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], port))
                .install()
                .map_err(|e| BuildError::Metrics(e.to_string()))?;
            info!(port, "metrics enabled at http://localhost:{port}/metrics");
        }

        Ok(EventLoop::with_config(&self.config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let mut config = LoopConfig::default();
        apply_overrides_from(&mut config, env(&[])).unwrap();
        assert_eq!(config, LoopConfig::default());
    }

    #[test]
    fn set_variables_override_defaults() {
        let mut config = LoopConfig::default();
        apply_overrides_from(
            &mut config,
            env(&[(ENV_EVENTS_CAPACITY, " 64 "), (ENV_METRICS_PORT, "9100")]),
        )
        .unwrap();
        assert_eq!(config.events_capacity, 64);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn unparseable_value_names_the_variable() {
        let mut config = LoopConfig::default();
        let err = apply_overrides_from(&mut config, env(&[(ENV_METRICS_PORT, "ninety")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidEnv { var, value, .. } => {
                assert_eq!(var, ENV_METRICS_PORT);
                assert_eq!(value, "ninety");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn builder_settings_win_and_are_validated() {
        let builder = Builder::new().events_capacity(8);
        assert_eq!(builder.config().events_capacity, 8);

        let err = Builder::new().events_capacity(0).build().unwrap_err();
        assert!(matches!(err, BuildError::Config(ConfigError::ZeroEventsCapacity)));
    }
}
