//! Shelf state store.
//!
//! One [`Shelf`] per monitored bay. The store owns every shelf and its
//! bounded temperature history; resizing it is destructive by design of the
//! controller protocol (indices are re-established from scratch).

use crate::error::{MonitorError, Result};
use ringbuffer::{AllocRingBuffer, RingBuffer};
use serde::Serialize;
use tracing::debug;

/// Values a shelf takes on creation or after a resize
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShelfDefaults {
    pub setpoint: f64,
    pub upper: f64,
    pub lower: f64,
    pub is_on: bool,
}

impl Default for ShelfDefaults {
    fn default() -> Self {
        Self {
            setpoint: 75.0,
            upper: 77.0,
            lower: 73.0,
            is_on: true,
        }
    }
}

/// A single heated bay
#[derive(Debug, Clone)]
pub struct Shelf {
    pub index: usize,
    pub is_on: bool,
    pub setpoint: f64,
    pub upper: f64,
    pub lower: f64,
    pub latest_temperature: Option<f64>,
    history: AllocRingBuffer<f64>,
}

impl Shelf {
    fn new(index: usize, defaults: &ShelfDefaults, capacity: usize) -> Self {
        Self {
            index,
            is_on: defaults.is_on,
            setpoint: defaults.setpoint,
            upper: defaults.upper,
            lower: defaults.lower,
            latest_temperature: None,
            history: AllocRingBuffer::new(capacity),
        }
    }

    /// Samples oldest first
    pub fn history(&self) -> Vec<f64> {
        self.history.iter().copied().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Mean of the last `window` samples
    pub fn rolling_average(&self, window: usize) -> Option<f64> {
        let len = self.history.len();
        if len == 0 || window == 0 {
            return None;
        }
        let take = window.min(len);
        let sum: f64 = self.history.iter().skip(len - take).sum();
        Some(sum / take as f64)
    }

    /// Midpoint of the safe band
    pub fn band_midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    fn record(&mut self, temperature: f64) {
        self.history.push(temperature);
        self.latest_temperature = Some(temperature);
    }
}

/// Read-only view of a shelf for presentation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShelfSnapshot {
    pub index: usize,
    pub is_on: bool,
    pub setpoint: f64,
    pub upper: f64,
    pub lower: f64,
    pub latest_temperature: Option<f64>,
    pub rolling_average: Option<f64>,
    pub history: Vec<f64>,
}

/// Every shelf plus the shared history capacity
#[derive(Debug, Clone)]
pub struct ShelfStore {
    shelves: Vec<Shelf>,
    history_capacity: usize,
    defaults: ShelfDefaults,
}

impl ShelfStore {
    /// Create `count` default shelves, each keeping `history_capacity` samples
    pub fn new(count: usize, history_capacity: usize, defaults: ShelfDefaults) -> Self {
        let history_capacity = history_capacity.max(1);
        Self {
            shelves: Self::allocate(count, history_capacity, &defaults),
            history_capacity,
            defaults,
        }
    }

    fn allocate(count: usize, capacity: usize, defaults: &ShelfDefaults) -> Vec<Shelf> {
        (0..count).map(|i| Shelf::new(i, defaults, capacity)).collect()
    }

    pub fn count(&self) -> usize {
        self.shelves.len()
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    pub fn defaults(&self) -> &ShelfDefaults {
        &self.defaults
    }

    /// Reallocate every shelf when the count changes
    ///
    /// All bounds, power states, latest temperatures and history are reset,
    /// including shelves whose index survives. Returns `true` if anything
    /// was reallocated.
    pub fn resize(&mut self, new_count: usize) -> bool {
        if new_count == self.shelves.len() {
            return false;
        }
        debug!("Resizing shelf store {} -> {}", self.shelves.len(), new_count);
        self.shelves = Self::allocate(new_count, self.history_capacity, &self.defaults);
        true
    }

    pub fn get(&self, index: usize) -> Option<&Shelf> {
        self.shelves.get(index)
    }

    /// Mutable access with the store's range check
    pub fn get_mut(&mut self, index: usize) -> Result<&mut Shelf> {
        let count = self.shelves.len();
        self.shelves
            .get_mut(index)
            .ok_or(MonitorError::OutOfRange { index, count })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shelf> {
        self.shelves.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Shelf> {
        self.shelves.iter_mut()
    }

    /// Append a sample and make it the latest reading
    pub fn apply_sample(&mut self, index: usize, temperature: f64) -> Result<()> {
        self.get_mut(index)?.record(temperature);
        Ok(())
    }

    /// Overwrite whichever bounds are provided; ordering is not checked
    pub fn set_bounds(
        &mut self,
        index: usize,
        setpoint: Option<f64>,
        upper: Option<f64>,
        lower: Option<f64>,
    ) -> Result<()> {
        let shelf = self.get_mut(index)?;
        if let Some(setpoint) = setpoint {
            shelf.setpoint = setpoint;
        }
        if let Some(upper) = upper {
            shelf.upper = upper;
        }
        if let Some(lower) = lower {
            shelf.lower = lower;
        }
        Ok(())
    }

    /// Flip power and return the new state
    pub fn toggle_power(&mut self, index: usize) -> Result<bool> {
        let shelf = self.get_mut(index)?;
        shelf.is_on = !shelf.is_on;
        Ok(shelf.is_on)
    }

    pub fn set_power(&mut self, index: usize, on: bool) -> Result<()> {
        self.get_mut(index)?.is_on = on;
        Ok(())
    }

    pub fn any_powered(&self) -> bool {
        self.shelves.iter().any(|s| s.is_on)
    }

    /// Latest readings of shelves that have one
    pub fn latest_temperatures(&self) -> Vec<f64> {
        self.shelves.iter().filter_map(|s| s.latest_temperature).collect()
    }

    pub fn snapshot(&self, rolling_window: usize) -> Vec<ShelfSnapshot> {
        self.shelves
            .iter()
            .map(|s| ShelfSnapshot {
                index: s.index,
                is_on: s.is_on,
                setpoint: s.setpoint,
                upper: s.upper,
                lower: s.lower,
                latest_temperature: s.latest_temperature,
                rolling_average: s.rolling_average(rolling_window),
                history: s.history(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(count: usize, capacity: usize) -> ShelfStore {
        ShelfStore::new(count, capacity, ShelfDefaults::default())
    }

    #[test]
    fn history_evicts_oldest() {
        let mut s = store(1, 3);
        for t in [10.0, 20.0, 30.0, 40.0] {
            s.apply_sample(0, t).unwrap();
        }
        assert_eq!(s.get(0).unwrap().history(), vec![20.0, 30.0, 40.0]);
        assert_eq!(s.get(0).unwrap().latest_temperature, Some(40.0));
    }

    #[test]
    fn sample_out_of_range_is_an_error() {
        let mut s = store(2, 5);
        let err = s.apply_sample(2, 50.0).unwrap_err();
        assert!(matches!(err, MonitorError::OutOfRange { index: 2, count: 2 }));
        assert!(s.get(0).unwrap().history().is_empty());
    }

    #[test]
    fn resize_resets_everything() {
        let mut s = store(2, 5);
        s.apply_sample(0, 80.0).unwrap();
        s.set_bounds(1, Some(50.0), Some(55.0), Some(45.0)).unwrap();
        s.toggle_power(1).unwrap();

        assert!(s.resize(3));
        assert_eq!(s.count(), 3);
        for shelf in s.iter() {
            assert_eq!(shelf.setpoint, 75.0);
            assert_eq!(shelf.upper, 77.0);
            assert_eq!(shelf.lower, 73.0);
            assert!(shelf.is_on);
            assert!(shelf.latest_temperature.is_none());
            assert_eq!(shelf.history_len(), 0);
        }
        assert_eq!(s.get(2).unwrap().index, 2);
    }

    #[test]
    fn resize_to_same_count_is_noop() {
        let mut s = store(2, 5);
        s.apply_sample(0, 80.0).unwrap();
        assert!(!s.resize(2));
        assert_eq!(s.get(0).unwrap().history(), vec![80.0]);
    }

    #[test]
    fn set_bounds_is_permissive() {
        let mut s = store(1, 5);
        s.set_bounds(0, Some(90.0), None, Some(95.0)).unwrap();
        let shelf = s.get(0).unwrap();
        assert_eq!(shelf.setpoint, 90.0);
        assert_eq!(shelf.upper, 77.0);
        assert_eq!(shelf.lower, 95.0);
    }

    #[test]
    fn toggle_power_flips() {
        let mut s = store(1, 5);
        assert!(!s.toggle_power(0).unwrap());
        assert!(!s.any_powered());
        assert!(s.toggle_power(0).unwrap());
        assert!(s.toggle_power(4).is_err());
    }

    #[test]
    fn rolling_average_uses_window() {
        let mut s = store(1, 10);
        assert_eq!(s.get(0).unwrap().rolling_average(3), None);
        for t in [1.0, 2.0, 3.0, 4.0, 5.0] {
            s.apply_sample(0, t).unwrap();
        }
        assert_eq!(s.get(0).unwrap().rolling_average(2), Some(4.5));
        assert_eq!(s.get(0).unwrap().rolling_average(50), Some(3.0));
    }
}
