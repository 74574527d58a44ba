//! Monitor configuration
//!
//! Loaded from an optional YAML file; every field has a default so a partial
//! file (or none at all) is valid.
//!
//! ```yaml
//! interface: can0
//! stats_interval_ms: 1000
//! reconnect:
//!   initial_backoff_ms: 50
//!   max_attempts: 10
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::filter::RangeFilter;
use crate::{BusError, Result};

/// Default interface when none is given.
pub const DEFAULT_INTERFACE: &str = "vcan0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub interface: String,
    /// Scroll log coalescing interval
    pub log_interval_ms: u64,
    pub stats_interval_ms: u64,
    /// Transmit indicator blink period
    pub blink_interval_ms: u64,
    /// How often the table snapshot is republished while frames arrive
    pub table_refresh_ms: u64,
    /// Capacity of the receive pump to ingest channel
    pub frame_queue: usize,
    /// Receive filter applied at startup
    pub filter: RangeFilter,
    pub reconnect: ReconnectPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            log_interval_ms: 250,
            stats_interval_ms: 1000,
            blink_interval_ms: 500,
            table_refresh_ms: 100,
            frame_queue: 1024,
            filter: RangeFilter::disabled(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl MonitorConfig {
    /// Read and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| BusError::Config {
            path: path.to_path_buf(),
            details: format!("cannot read file: {e}"),
        })?;
        Self::from_yaml(&text).map_err(|e| match e {
            BusError::Parse { details, .. } => BusError::Config { path: path.to_path_buf(), details },
            other => other,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(text)
            .map_err(|e| BusError::parse_error("monitor config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the background tasks cannot run with.
    ///
    /// Called by [`MonitorConfig::from_yaml`] and by `Monitor::spawn`, so a
    /// config assembled in code is checked too.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("log_interval_ms", self.log_interval_ms),
            ("stats_interval_ms", self.stats_interval_ms),
            ("blink_interval_ms", self.blink_interval_ms),
            ("table_refresh_ms", self.table_refresh_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
            return Err(BusError::parse_error("monitor config", format!("{name} must be positive")));
        }
        if self.frame_queue == 0 {
            return Err(BusError::parse_error("monitor config", "frame_queue must be positive"));
        }
        if self.interface.trim().is_empty() {
            return Err(BusError::parse_error("monitor config", "interface must not be empty"));
        }
        self.reconnect.validate()
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.blink_interval_ms)
    }

    pub fn table_refresh(&self) -> Duration {
        Duration::from_millis(self.table_refresh_ms)
    }
}

/// Backoff for reopening the transport after a receive failure.
///
/// The delay starts at `initial_backoff_ms` and doubles per failed attempt up
/// to `max_backoff_ms`. With `max_attempts` unset the pump retries forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectPolicy {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { initial_backoff_ms: 50, max_backoff_ms: 1600, max_attempts: None }
    }
}

impl ReconnectPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms))
    }

    fn validate(&self) -> Result<()> {
        if self.initial_backoff_ms == 0 {
            return Err(BusError::parse_error("reconnect policy", "initial_backoff_ms must be positive"));
        }
        if self.max_attempts == Some(0) {
            return Err(BusError::parse_error("reconnect policy", "max_attempts must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = MonitorConfig::from_yaml("{}").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.interface, "vcan0");
        assert_eq!(config.log_interval(), Duration::from_millis(250));
    }

    #[test]
    fn partial_document_overrides_fields() {
        let yaml = "interface: can1\nreconnect:\n  max_attempts: 3\nfilter:\n  start: 256\n  end: 511\n  enabled: true\n";
        let config = MonitorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.interface, "can1");
        assert_eq!(config.reconnect.max_attempts, Some(3));
        assert_eq!(config.reconnect.initial_backoff_ms, 50);
        assert!(config.filter.accepts(0x100));
        assert!(!config.filter.accepts(0x200));
        assert_eq!(config.stats_interval_ms, 1000);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let err = MonitorConfig::from_yaml("stats_interval_ms: 0").unwrap_err();
        assert!(err.to_string().contains("stats_interval_ms"));
    }

    #[test]
    fn configs_built_in_code_are_validated() {
        assert!(MonitorConfig::default().validate().is_ok());
        let config = MonitorConfig { table_refresh_ms: 0, ..MonitorConfig::default() };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("table_refresh_ms"));
        let config = MonitorConfig { frame_queue: 0, ..MonitorConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(MonitorConfig::from_yaml("bitrate: 500000").is_err());
    }

    #[test]
    fn load_reports_the_path() {
        let err = MonitorConfig::load("/nonexistent/canscope.yaml").unwrap_err();
        assert!(matches!(err, BusError::Config { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn backoff_cap_never_below_initial() {
        let policy = ReconnectPolicy { initial_backoff_ms: 500, max_backoff_ms: 100, max_attempts: None };
        assert_eq!(policy.max_backoff(), Duration::from_millis(500));
    }
}
