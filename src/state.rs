//! Monitor session state.
//!
//! [`MonitorState`] is constructed once at startup and owns the shelf store,
//! alarm registry, maintenance record and operator log. The engine mutates
//! it behind a single mutex during a tick; presentation reads it through
//! [`MonitorState::snapshot`].

use crate::alarms::{Alarm, AlarmRegistry};
use crate::config::Config;
use crate::event_log::EventLog;
use crate::maintenance::{MaintenanceRecord, MaintenanceSnapshot};
use crate::shelf::{ShelfSnapshot, ShelfStore};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Whether telemetry is generated locally or sourced from the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Demo,
    Live,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Demo => f.write_str("DEMO"),
            Mode::Live => f.write_str("LIVE"),
        }
    }
}

/// State shared between the engine and readers
pub type SharedState = Arc<Mutex<MonitorState>>;

pub struct MonitorState {
    pub shelves: ShelfStore,
    pub alarms: AlarmRegistry,
    pub maintenance: MaintenanceRecord,
    pub log: EventLog,
    mode: Mode,
    last_update: Option<DateTime<Local>>,
}

/// Headline figures for a status board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub average_temperature: Option<f64>,
    pub hottest_temperature: Option<f64>,
    pub active_alarms: usize,
    pub unacknowledged_alarms: usize,
}

/// Everything a presentation layer renders, copied out under the lock
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub mode: Mode,
    pub last_update: Option<DateTime<Local>>,
    pub shelves: Vec<ShelfSnapshot>,
    pub alarms: BTreeMap<String, Vec<Alarm>>,
    pub maintenance: MaintenanceSnapshot,
    pub kpis: Kpis,
    pub log_tail: Vec<String>,
}

impl MonitorState {
    pub fn new(config: &Config) -> Self {
        Self {
            shelves: ShelfStore::new(
                config.shelves.count,
                config.shelves.history_len,
                config.shelves.defaults(),
            ),
            alarms: AlarmRegistry::new(),
            maintenance: MaintenanceRecord::from_config(&config.maintenance),
            log: EventLog::new(config.log.capacity),
            mode: Mode::Demo,
            last_update: None,
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch mode; returns `true` if it changed
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        if self.mode == mode {
            return false;
        }
        self.mode = mode;
        true
    }

    pub fn last_update(&self) -> Option<DateTime<Local>> {
        self.last_update
    }

    pub fn mark_updated(&mut self) {
        self.last_update = Some(Local::now());
    }

    /// Re-establish the shelf count
    ///
    /// Destroys all per-shelf data and any alarm on an index that no longer
    /// exists. The loss is recorded in the operator log.
    pub fn resize_shelves(&mut self, count: usize) -> bool {
        let previous = self.shelves.count();
        if !self.shelves.resize(count) {
            return false;
        }
        let dropped = self.alarms.retain_shelves(count);
        warn!(
            "Shelf count changed {} -> {}; history reset, {} alarm(s) dropped",
            previous, count, dropped
        );
        self.log.push(format!(
            "Shelf count changed from {} to {}: bounds and history reset",
            previous, count
        ));
        true
    }

    pub fn kpis(&self) -> Kpis {
        let temps = self.shelves.latest_temperatures();
        let average_temperature = if temps.is_empty() {
            None
        } else {
            Some(temps.iter().sum::<f64>() / temps.len() as f64)
        };
        let hottest_temperature = temps.iter().copied().reduce(f64::max);

        Kpis {
            average_temperature,
            hottest_temperature,
            active_alarms: self.alarms.active_count(),
            unacknowledged_alarms: self.alarms.unacknowledged_count(),
        }
    }

    pub fn snapshot(&self, rolling_window: usize, log_tail: usize) -> StatusSnapshot {
        StatusSnapshot {
            mode: self.mode,
            last_update: self.last_update,
            shelves: self.shelves.snapshot(rolling_window),
            alarms: self.alarms.by_severity(),
            maintenance: self.maintenance.snapshot(),
            kpis: self.kpis(),
            log_tail: self.log.tail(log_tail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::Severity;

    fn state() -> MonitorState {
        MonitorState::new(&Config::default())
    }

    #[test]
    fn starts_in_demo_with_configured_shelves() {
        let s = state();
        assert_eq!(s.mode(), Mode::Demo);
        assert_eq!(s.shelves.count(), 2);
        assert!(s.last_update().is_none());
    }

    #[test]
    fn resize_drops_alarms_beyond_count_and_logs() {
        let mut s = state();
        s.resize_shelves(4);
        let MonitorState { alarms, log, .. } = &mut s;
        alarms.raise(Severity::Error, 0, "A", "", false, log);
        alarms.raise(Severity::Error, 3, "B", "", false, log);
        let before = s.log.len();

        assert!(s.resize_shelves(2));
        assert_eq!(s.alarms.active_count(), 1);
        assert_eq!(s.log.len(), before + 1);
        assert!(!s.resize_shelves(2));
    }

    #[test]
    fn kpis_over_latest_temperatures() {
        let mut s = state();
        assert_eq!(s.kpis().average_temperature, None);
        s.shelves.apply_sample(0, 70.0).unwrap();
        s.shelves.apply_sample(1, 80.0).unwrap();
        let kpis = s.kpis();
        assert_eq!(kpis.average_temperature, Some(75.0));
        assert_eq!(kpis.hottest_temperature, Some(80.0));
    }

    #[test]
    fn snapshot_serializes() {
        let mut s = state();
        s.shelves.apply_sample(0, 74.0).unwrap();
        s.mark_updated();
        let snap = s.snapshot(20, 10);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["mode"], "DEMO");
        assert_eq!(json["shelves"].as_array().unwrap().len(), 2);
        assert!(json["alarms"]["CRITICAL"].as_array().unwrap().is_empty());
        assert_eq!(json["maintenance"]["fan_remaining_hours"], 2000.0);
    }
}
