//! Run-hour accrual for wear-limited components.

use crate::config::MaintenanceConfig;
use serde::Serialize;

/// Process-wide run-hour counters and service-life ceilings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceRecord {
    pub fan_hours: f64,
    pub element_hours: f64,
    pub fan_life_hours: f64,
    pub element_life_hours: f64,
}

/// Presentation view including derived remaining life
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceSnapshot {
    pub fan_hours: f64,
    pub element_hours: f64,
    pub fan_life_hours: f64,
    pub element_life_hours: f64,
    pub fan_remaining_hours: f64,
    pub element_remaining_hours: f64,
    pub fan_life_used: f64,
    pub element_life_used: f64,
}

impl MaintenanceRecord {
    pub fn new(fan_life_hours: f64, element_life_hours: f64) -> Self {
        Self {
            fan_hours: 0.0,
            element_hours: 0.0,
            fan_life_hours,
            element_life_hours,
        }
    }

    pub fn from_config(config: &MaintenanceConfig) -> Self {
        Self::new(config.fan_life_hours, config.element_life_hours)
    }

    /// Add elapsed run time to both components
    ///
    /// Negative or non-finite input is ignored so the counters never go
    /// backwards. Power gating is the caller's job.
    pub fn accrue(&mut self, elapsed_hours: f64) {
        if !elapsed_hours.is_finite() || elapsed_hours <= 0.0 {
            return;
        }
        self.fan_hours += elapsed_hours;
        self.element_hours += elapsed_hours;
    }

    /// Overwrite whichever values the controller supplied
    pub fn apply_authoritative(
        &mut self,
        fan_hours: Option<f64>,
        element_hours: Option<f64>,
        fan_life_hours: Option<f64>,
        element_life_hours: Option<f64>,
    ) {
        if let Some(v) = fan_hours {
            self.fan_hours = v;
        }
        if let Some(v) = element_hours {
            self.element_hours = v;
        }
        if let Some(v) = fan_life_hours {
            self.fan_life_hours = v;
        }
        if let Some(v) = element_life_hours {
            self.element_life_hours = v;
        }
    }

    pub fn fan_remaining(&self) -> f64 {
        remaining(self.fan_life_hours, self.fan_hours)
    }

    pub fn element_remaining(&self) -> f64 {
        remaining(self.element_life_hours, self.element_hours)
    }

    pub fn snapshot(&self) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            fan_hours: self.fan_hours,
            element_hours: self.element_hours,
            fan_life_hours: self.fan_life_hours,
            element_life_hours: self.element_life_hours,
            fan_remaining_hours: self.fan_remaining(),
            element_remaining_hours: self.element_remaining(),
            fan_life_used: life_used(self.fan_life_hours, self.fan_hours),
            element_life_used: life_used(self.element_life_hours, self.element_hours),
        }
    }
}

fn remaining(life: f64, accrued: f64) -> f64 {
    (life - accrued).max(0.0)
}

// Fraction of life consumed, capped at 1.0; zero life counts as fully used.
fn life_used(life: f64, accrued: f64) -> f64 {
    if life <= 0.0 {
        return 1.0;
    }
    (accrued / life).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accrue_is_strict_addition() {
        let mut m = MaintenanceRecord::new(2000.0, 3000.0);
        m.fan_hours = 10.0;
        m.accrue(0.5);
        m.accrue(0.5);
        assert_eq!(m.fan_hours, 11.0);
        assert_eq!(m.element_hours, 1.0);
    }

    #[test]
    fn accrue_ignores_negative_and_nan() {
        let mut m = MaintenanceRecord::new(100.0, 100.0);
        m.accrue(-1.0);
        m.accrue(f64::NAN);
        assert_eq!(m.fan_hours, 0.0);
    }

    #[test]
    fn remaining_never_negative() {
        let mut m = MaintenanceRecord::new(100.0, 100.0);
        m.fan_hours = 150.0;
        assert_eq!(m.fan_remaining(), 0.0);
        assert_eq!(m.element_remaining(), 100.0);
        assert_eq!(m.snapshot().fan_life_used, 1.0);
    }

    #[test]
    fn authoritative_values_overwrite() {
        let mut m = MaintenanceRecord::new(2000.0, 3000.0);
        m.accrue(5.0);
        m.apply_authoritative(Some(1.0), None, None, Some(4000.0));
        assert_eq!(m.fan_hours, 1.0);
        assert_eq!(m.element_hours, 5.0);
        assert_eq!(m.fan_life_hours, 2000.0);
        assert_eq!(m.element_life_hours, 4000.0);
    }
}
