// src/demo.rs - Synthetic telemetry for DEMO mode
//
// Bounded random walk per shelf plus a threshold alarm heuristic. Not a
// thermal model; it only has to look plausible on a status board.

use crate::alarms::Severity;
use crate::config::DemoConfig;
use crate::state::MonitorState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use tracing::{trace, warn};

pub const OVERHEAT: &str = "OVERHEAT";
pub const OVERTEMP: &str = "OVERTEMP";
pub const UNDERTEMP: &str = "UNDERTEMP";

pub struct DemoGenerator {
    config: DemoConfig,
    rng: StdRng,
    last_tick: Option<Instant>,
}

impl DemoGenerator {
    pub fn new(config: DemoConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng,
            last_tick: None,
        }
    }

    pub fn config(&self) -> &DemoConfig {
        &self.config
    }

    /// Forget the previous tick so time spent outside DEMO is not accrued
    pub fn reset_clock(&mut self) {
        self.last_tick = None;
    }

    pub fn step(&mut self, state: &mut MonitorState) {
        self.step_at(state, Instant::now());
    }

    /// One DEMO tick as of `now`
    pub fn step_at(&mut self, state: &mut MonitorState, now: Instant) {
        for index in 0..state.shelves.count() {
            let Some(shelf) = state.shelves.get(index) else {
                continue;
            };
            let (is_on, upper, lower) = (shelf.is_on, shelf.upper, shelf.lower);
            let current = shelf
                .latest_temperature
                .unwrap_or_else(|| shelf.band_midpoint());

            let next = self.walk(current, is_on);
            if let Err(e) = state.shelves.apply_sample(index, next) {
                warn!("Demo sample for shelf {} dropped: {}", index, e);
                continue;
            }
            self.evaluate(state, index, next, is_on, upper, lower);
        }

        if let Some(previous) = self.last_tick {
            if state.shelves.any_powered() {
                let elapsed_hours = now.saturating_duration_since(previous).as_secs_f64() / 3600.0;
                state.maintenance.accrue(elapsed_hours);
            }
        }
        self.last_tick = Some(now);
        state.mark_updated();
    }

    fn walk(&mut self, current: f64, is_on: bool) -> f64 {
        let DemoConfig {
            rise_min,
            rise_max,
            cool_max,
            min_temp,
            max_temp,
            ..
        } = self.config;

        let next = if is_on {
            current + self.rng.gen_range(rise_min..=rise_max.max(rise_min))
        } else {
            current - self.rng.gen_range(0.0..=cool_max.max(0.0))
        };
        next.clamp(min_temp, max_temp)
    }

    // Highest severity wins; OVERHEAT and OVERTEMP never coexist.
    fn evaluate(
        &self,
        state: &mut MonitorState,
        index: usize,
        t: f64,
        is_on: bool,
        upper: f64,
        lower: f64,
    ) {
        let MonitorState { alarms, log, .. } = state;
        let critical = Severity::Critical;
        let error = Severity::Error;

        if t > upper + self.config.overheat_margin {
            if is_on {
                let desc = format!("{:.1}°C >> {:.1}°C", t, upper);
                alarms.raise(critical, index, OVERHEAT, &desc, false, log);
            }
            alarms.clear(&error, index, OVERTEMP, log);
        } else if t > upper + self.config.overtemp_margin {
            if is_on {
                let desc = format!("{:.1}°C > {:.1}°C", t, upper);
                alarms.raise(error, index, OVERTEMP, &desc, false, log);
            }
            alarms.clear(&critical, index, OVERHEAT, log);
        } else {
            alarms.clear(&error, index, OVERTEMP, log);
            alarms.clear(&critical, index, OVERHEAT, log);
        }

        if t < lower - self.config.undertemp_margin {
            if is_on {
                let desc = format!("{:.1}°C < {:.1}°C", t, lower);
                alarms.raise(Severity::Error, index, UNDERTEMP, &desc, false, log);
            }
        } else {
            alarms.clear(&Severity::Error, index, UNDERTEMP, log);
        }
        trace!("Demo shelf {} at {:.2}", index, t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    fn seeded(config: DemoConfig) -> DemoGenerator {
        DemoGenerator::new(DemoConfig {
            seed: Some(7),
            ..config
        })
    }

    fn state() -> MonitorState {
        MonitorState::new(&Config::default())
    }

    #[test]
    fn walk_starts_at_band_midpoint() {
        let mut s = state();
        let mut g = seeded(DemoConfig::default());
        g.step(&mut s);
        let t = s.shelves.get(0).unwrap().latest_temperature.unwrap();
        assert!((75.0 - 0.25..=75.0 + 0.35).contains(&t), "t = {}", t);
        assert_eq!(s.shelves.get(0).unwrap().history_len(), 1);
    }

    #[test]
    fn unpowered_shelf_cools_and_clamps() {
        let mut s = state();
        s.shelves.set_power(0, false).unwrap();
        s.shelves.apply_sample(0, 0.1).unwrap();
        let mut g = seeded(DemoConfig::default());
        for _ in 0..10 {
            g.step(&mut s);
        }
        assert_eq!(s.shelves.get(0).unwrap().latest_temperature, Some(0.0));
    }

    #[test]
    fn overheat_replaces_overtemp() {
        let mut s = state();
        // Flat walk so the thresholds are deterministic.
        let mut g = seeded(DemoConfig {
            rise_min: 0.0,
            rise_max: 0.0,
            ..DemoConfig::default()
        });

        s.shelves.apply_sample(0, 81.0).unwrap();
        g.step(&mut s);
        assert!(s.alarms.get(&Severity::Error, 0, OVERTEMP).is_some());
        assert!(s.alarms.get(&Severity::Critical, 0, OVERHEAT).is_none());

        s.shelves.apply_sample(0, 90.0).unwrap();
        g.step(&mut s);
        assert!(s.alarms.get(&Severity::Error, 0, OVERTEMP).is_none());
        assert!(s.alarms.get(&Severity::Critical, 0, OVERHEAT).is_some());

        s.shelves.apply_sample(0, 75.0).unwrap();
        g.step(&mut s);
        assert_eq!(s.alarms.active_count(), 0);
    }

    #[test]
    fn undertemp_when_powered() {
        let mut s = state();
        let mut g = seeded(DemoConfig {
            rise_min: 0.0,
            rise_max: 0.0,
            ..DemoConfig::default()
        });
        s.shelves.apply_sample(0, 60.0).unwrap();
        g.step(&mut s);
        let alarm = s.alarms.get(&Severity::Error, 0, UNDERTEMP).unwrap();
        assert_eq!(alarm.description, "60.0°C < 73.0°C");
    }

    #[test]
    fn unpowered_shelf_raises_nothing_but_still_clears() {
        let mut s = state();
        let mut g = seeded(DemoConfig {
            cool_max: 0.0,
            ..DemoConfig::default()
        });
        s.shelves.apply_sample(0, 90.0).unwrap();
        {
            let MonitorState { alarms, log, .. } = &mut s;
            alarms.raise(Severity::Error, 0, OVERTEMP, "", false, log);
        }
        s.shelves.set_power(0, false).unwrap();
        g.step(&mut s);
        assert!(s.alarms.for_shelf(0).is_empty());
    }

    #[test]
    fn accrues_only_when_powered_and_after_first_tick() {
        let mut s = state();
        let mut g = seeded(DemoConfig::default());
        let start = Instant::now();

        g.step_at(&mut s, start);
        assert_eq!(s.maintenance.fan_hours, 0.0);

        g.step_at(&mut s, start + Duration::from_secs(1800));
        assert!((s.maintenance.fan_hours - 0.5).abs() < 1e-9);

        for i in 0..s.shelves.count() {
            s.shelves.set_power(i, false).unwrap();
        }
        g.step_at(&mut s, start + Duration::from_secs(3600));
        assert!((s.maintenance.element_hours - 0.5).abs() < 1e-9);

        g.reset_clock();
        for i in 0..s.shelves.count() {
            s.shelves.set_power(i, true).unwrap();
        }
        g.step_at(&mut s, start + Duration::from_secs(7200));
        assert!((s.maintenance.fan_hours - 0.5).abs() < 1e-9);
    }
}
