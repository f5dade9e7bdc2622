// src/config.rs - Monitor configuration with per-section defaults

use crate::error::{MonitorError, Result};
use crate::shelf::ShelfDefaults;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main shelfwatch configuration
///
/// Every section and field has a default, so an empty YAML document is a
/// valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tick engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Shelf layout and defaults
    #[serde(default)]
    pub shelves: ShelvesConfig,

    /// Demo signal generator tuning
    #[serde(default)]
    pub demo: DemoConfig,

    /// Serial link to the physical controller
    #[serde(default)]
    pub serial: SerialConfig,

    /// Maintenance life ceilings
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Operator event log
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.tick_ms == 0 {
            return Err(MonitorError::Config("engine.tick_ms must be > 0".into()));
        }
        if self.engine.max_messages_per_tick == 0 {
            return Err(MonitorError::Config(
                "engine.max_messages_per_tick must be > 0".into(),
            ));
        }
        if self.shelves.max_count == 0 {
            return Err(MonitorError::Config("shelves.max_count must be > 0".into()));
        }
        if self.shelves.count > self.shelves.max_count {
            return Err(MonitorError::Config(format!(
                "shelves.count ({}) must not exceed shelves.max_count ({})",
                self.shelves.count, self.shelves.max_count
            )));
        }
        if self.shelves.history_len == 0 {
            return Err(MonitorError::Config("shelves.history_len must be > 0".into()));
        }
        if self.log.capacity == 0 {
            return Err(MonitorError::Config("log.capacity must be > 0".into()));
        }
        let demo = &self.demo;
        for (name, value) in [
            ("min_temp", demo.min_temp),
            ("max_temp", demo.max_temp),
            ("rise_min", demo.rise_min),
            ("rise_max", demo.rise_max),
            ("cool_max", demo.cool_max),
            ("overtemp_margin", demo.overtemp_margin),
            ("overheat_margin", demo.overheat_margin),
            ("undertemp_margin", demo.undertemp_margin),
        ] {
            if !value.is_finite() {
                return Err(MonitorError::Config(format!(
                    "demo.{} must be a finite number, got {}",
                    name, value
                )));
            }
        }
        if self.demo.min_temp >= self.demo.max_temp {
            return Err(MonitorError::Config(format!(
                "demo.min_temp ({}) must be below demo.max_temp ({})",
                self.demo.min_temp, self.demo.max_temp
            )));
        }
        if self.demo.rise_min > self.demo.rise_max {
            return Err(MonitorError::Config(
                "demo.rise_min must not exceed demo.rise_max".into(),
            ));
        }
        if self.demo.cool_max < 0.0 {
            return Err(MonitorError::Config("demo.cool_max must be >= 0".into()));
        }
        if self.serial.max_line_len == 0 {
            return Err(MonitorError::Config("serial.max_line_len must be > 0".into()));
        }
        Ok(())
    }
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Tick engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tick period in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Upper bound on messages drained from the link per tick
    #[serde(default = "default_max_messages")]
    pub max_messages_per_tick: usize,

    /// Number of trailing log lines included in status snapshots
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            max_messages_per_tick: default_max_messages(),
            log_tail: default_log_tail(),
        }
    }
}

// ============================================================================
// SHELF CONFIGURATION
// ============================================================================

/// Shelf layout used until a controller reports otherwise
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelvesConfig {
    /// Initial shelf count
    #[serde(default = "default_shelf_count")]
    pub count: usize,

    /// Largest shelf count accepted from the controller
    #[serde(default = "default_max_shelf_count")]
    pub max_count: usize,

    /// Samples retained per shelf
    #[serde(default = "default_history_len")]
    pub history_len: usize,

    /// Setpoint assigned to freshly created shelves
    #[serde(default = "default_setpoint")]
    pub setpoint: f64,

    /// Upper bound assigned to freshly created shelves
    #[serde(default = "default_upper")]
    pub upper: f64,

    /// Lower bound assigned to freshly created shelves
    #[serde(default = "default_lower")]
    pub lower: f64,

    /// Power state of freshly created shelves
    #[serde(default = "default_true")]
    pub power_on: bool,

    /// Window for the per-shelf rolling average
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,

    /// Increment used when the operator steps a setpoint
    #[serde(default = "default_setpoint_step")]
    pub setpoint_step: f64,
}

impl ShelvesConfig {
    /// Defaults applied to every shelf on creation or resize
    pub fn defaults(&self) -> ShelfDefaults {
        ShelfDefaults {
            setpoint: self.setpoint,
            upper: self.upper,
            lower: self.lower,
            is_on: self.power_on,
        }
    }
}

impl Default for ShelvesConfig {
    fn default() -> Self {
        Self {
            count: default_shelf_count(),
            max_count: default_max_shelf_count(),
            history_len: default_history_len(),
            setpoint: default_setpoint(),
            upper: default_upper(),
            lower: default_lower(),
            power_on: default_true(),
            rolling_window: default_rolling_window(),
            setpoint_step: default_setpoint_step(),
        }
    }
}

// ============================================================================
// DEMO CONFIGURATION
// ============================================================================

/// Demo signal generator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Lowest temperature the walk may reach
    #[serde(default = "default_min_temp")]
    pub min_temp: f64,

    /// Highest temperature the walk may reach
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,

    /// Lower end of the per-tick perturbation while powered
    #[serde(default = "default_rise_min")]
    pub rise_min: f64,

    /// Upper end of the per-tick perturbation while powered
    #[serde(default = "default_rise_max")]
    pub rise_max: f64,

    /// Maximum per-tick cooling while unpowered
    #[serde(default = "default_cool_max")]
    pub cool_max: f64,

    /// Margin above `upper` that raises ERROR OVERTEMP
    #[serde(default = "default_overtemp_margin")]
    pub overtemp_margin: f64,

    /// Margin above `upper` that raises CRITICAL OVERHEAT
    #[serde(default = "default_overheat_margin")]
    pub overheat_margin: f64,

    /// Margin below `lower` that raises ERROR UNDERTEMP
    #[serde(default = "default_undertemp_margin")]
    pub undertemp_margin: f64,

    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            min_temp: default_min_temp(),
            max_temp: default_max_temp(),
            rise_min: default_rise_min(),
            rise_max: default_rise_max(),
            cool_max: default_cool_max(),
            overtemp_margin: default_overtemp_margin(),
            overheat_margin: default_overheat_margin(),
            undertemp_margin: default_undertemp_margin(),
            seed: None,
        }
    }
}

// ============================================================================
// SERIAL CONFIGURATION
// ============================================================================

/// Serial link to the shelf controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. /dev/ttyUSB0 or COM4
    #[serde(default = "default_port")]
    pub port: String,

    /// Baud rate
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Per-line read timeout while draining a tick
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Delay after opening the port while the controller resets
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Longest accepted line; longer lines are discarded and logged
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,

    /// Attempt one connection at startup
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: default_baud(),
            read_timeout_ms: default_read_timeout(),
            settle_ms: default_settle_ms(),
            max_line_len: default_max_line_len(),
            auto_connect: default_true(),
        }
    }
}

// ============================================================================
// MAINTENANCE / LOG CONFIGURATION
// ============================================================================

/// Service-life ceilings used until the controller supplies its own
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_fan_life")]
    pub fan_life_hours: f64,

    #[serde(default = "default_element_life")]
    pub element_life_hours: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            fan_life_hours: default_fan_life(),
            element_life_hours: default_element_life(),
        }
    }
}

/// Operator event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Entries retained before the oldest is evicted
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
        }
    }
}

// ============================================================================
// DEFAULTS
// ============================================================================

fn default_tick_ms() -> u64 { 1000 }
fn default_max_messages() -> usize { 200 }
fn default_log_tail() -> usize { 300 }
fn default_shelf_count() -> usize { 2 }
fn default_max_shelf_count() -> usize { 64 }
fn default_history_len() -> usize { 300 }
fn default_setpoint() -> f64 { 75.0 }
fn default_upper() -> f64 { 77.0 }
fn default_lower() -> f64 { 73.0 }
fn default_true() -> bool { true }
fn default_rolling_window() -> usize { 20 }
fn default_setpoint_step() -> f64 { 0.5 }
fn default_min_temp() -> f64 { 0.0 }
fn default_max_temp() -> f64 { 120.0 }
fn default_rise_min() -> f64 { -0.25 }
fn default_rise_max() -> f64 { 0.35 }
fn default_cool_max() -> f64 { 0.2 }
fn default_overtemp_margin() -> f64 { 3.0 }
fn default_overheat_margin() -> f64 { 6.0 }
fn default_undertemp_margin() -> f64 { 3.0 }
fn default_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud() -> u32 { 115_200 }
fn default_read_timeout() -> u64 { 50 }
fn default_settle_ms() -> u64 { 1500 }
fn default_max_line_len() -> usize { 16 * 1024 }
fn default_fan_life() -> f64 { 2000.0 }
fn default_element_life() -> f64 { 3000.0 }
fn default_log_capacity() -> usize { 400 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.engine.tick_ms, 1000);
        assert_eq!(config.shelves.count, 2);
        assert_eq!(config.shelves.history_len, 300);
        assert_eq!(config.serial.baud, 115_200);
        assert_eq!(config.log.capacity, 400);
        assert_eq!(config.maintenance.fan_life_hours, 2000.0);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let yaml = r#"
shelves:
  count: 4
  setpoint: 60.0
serial:
  port: "COM5"
  auto_connect: false
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.shelves.count, 4);
        assert_eq!(config.shelves.setpoint, 60.0);
        assert_eq!(config.shelves.upper, 77.0);
        assert_eq!(config.serial.port, "COM5");
        assert!(!config.serial.auto_connect);
        assert_eq!(config.serial.read_timeout_ms, 50);
    }

    #[test]
    fn rejects_zero_history() {
        let err = Config::from_yaml("shelves:\n  history_len: 0\n").unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn rejects_inverted_demo_range() {
        let err = Config::from_yaml("demo:\n  min_temp: 50\n  max_temp: 10\n").unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn rejects_non_finite_demo_values() {
        let err = Config::from_yaml("demo:\n  min_temp: .nan\n").unwrap_err();
        assert!(err.to_string().contains("demo.min_temp"));
        let err = Config::from_yaml("demo:\n  max_temp: .inf\n").unwrap_err();
        assert!(err.to_string().contains("demo.max_temp"));
        let err = Config::from_yaml("demo:\n  overheat_margin: .nan\n").unwrap_err();
        assert!(err.to_string().contains("demo.overheat_margin"));
    }

    #[test]
    fn shelf_count_must_fit_max_count() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.shelves.max_count, 64);
        let err = Config::from_yaml("shelves:\n  count: 8\n  max_count: 4\n").unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
        assert!(Config::from_yaml("shelves:\n  max_count: 0\n").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engine:\n  tick_ms: 250").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.engine.tick_ms, 250);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::from_file("/nonexistent/shelfwatch.yaml").unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }
}
