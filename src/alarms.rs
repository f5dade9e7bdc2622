// File: src/alarms.rs
// Alarm registry for shelfwatch
//
// Alarms are keyed by (severity, shelf, name). Raising an existing key is a
// no-op, clearing removes the record, and acknowledgement is advisory only.

use crate::event_log::EventLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

// ==========================================
// SECTION 1: ALARM DATA STRUCTURES
// ==========================================

/// Alarm urgency class
///
/// The controller normally sends `CRITICAL` or `ERROR`. Any other string is
/// kept verbatim (upper-cased) in its own bucket rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    /// Immediate operator action required
    Critical,

    /// Operator action required
    Error,

    /// Source-provided class outside the built-in set
    Other(String),
}

impl Severity {
    /// Buckets that always exist, in display order
    pub const BUILTIN: [Severity; 2] = [Severity::Critical, Severity::Error];

    /// Parse a source-provided severity; blank defaults to ERROR
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "ERROR" | "" => Severity::Error,
            other => Severity::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Other(name) => name,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Severity {
    fn from(raw: String) -> Self {
        Severity::parse(&raw)
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        severity.as_str().to_string()
    }
}

/// Live alarm record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alarm {
    pub severity: Severity,
    pub shelf: usize,
    pub name: String,
    pub description: String,
    pub acknowledged: bool,
    pub raised_at: DateTime<Utc>,
}

/// Alarm to be raised as part of a shelf snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlarm {
    pub severity: Severity,
    pub name: String,
    pub description: String,
    pub acknowledged: bool,
}

/// What a [`AlarmRegistry::replace_for_shelf`] call changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Keys that were not present before the snapshot
    pub raised: usize,
    /// Keys present before and after the snapshot
    pub kept: usize,
    /// Keys present before but absent from the snapshot
    pub cleared: usize,
}

// ==========================================
// SECTION 2: ALARM REGISTRY
// ==========================================

/// Mapping of severity → ordered alarm list
///
/// Within a bucket alarms keep insertion order.
#[derive(Debug, Clone)]
pub struct AlarmRegistry {
    buckets: BTreeMap<Severity, Vec<Alarm>>,
}

impl Default for AlarmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmRegistry {
    pub fn new() -> Self {
        let buckets = Severity::BUILTIN
            .iter()
            .cloned()
            .map(|severity| (severity, Vec::new()))
            .collect();
        Self { buckets }
    }

    /// Insert the alarm unless its key already exists
    ///
    /// Returns `true` when a record was created. An existing record keeps
    /// its description, acknowledgement and `raised_at`.
    pub fn raise(
        &mut self,
        severity: Severity,
        shelf: usize,
        name: &str,
        description: &str,
        acknowledged: bool,
        log: &mut EventLog,
    ) -> bool {
        if self.get(&severity, shelf, name).is_some() {
            return false;
        }

        info!("Alarm raised: [{}] shelf {} {}", severity, shelf, name);
        log.push(format!("Alarm raised: [{}] shelf {} {}", severity, shelf, name));

        self.buckets.entry(severity.clone()).or_default().push(Alarm {
            severity,
            shelf,
            name: name.to_string(),
            description: description.to_string(),
            acknowledged,
            raised_at: Utc::now(),
        });
        true
    }

    /// Remove the record for the key; returns `true` if one existed
    pub fn clear(&mut self, severity: &Severity, shelf: usize, name: &str, log: &mut EventLog) -> bool {
        let Some(bucket) = self.buckets.get_mut(severity) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|a| !(a.shelf == shelf && a.name == name));
        if bucket.len() == before {
            return false;
        }

        info!("Alarm cleared: [{}] shelf {} {}", severity, shelf, name);
        log.push(format!("Alarm cleared: [{}] shelf {} {}", severity, shelf, name));
        true
    }

    /// Mark the alarm acknowledged; returns `true` on a false → true transition
    pub fn acknowledge(&mut self, severity: &Severity, shelf: usize, name: &str, log: &mut EventLog) -> bool {
        let Some(alarm) = self.get_mut(severity, shelf, name) else {
            return false;
        };
        if alarm.acknowledged {
            return false;
        }
        alarm.acknowledged = true;

        info!("Alarm acknowledged: [{}] shelf {} {}", severity, shelf, name);
        log.push(format!("Alarm acknowledged: [{}] shelf {} {}", severity, shelf, name));
        true
    }

    /// Acknowledge every record; always logs
    pub fn acknowledge_all(&mut self, log: &mut EventLog) {
        for alarm in self.buckets.values_mut().flat_map(|b| b.iter_mut()) {
            alarm.acknowledged = true;
        }
        info!("All alarms acknowledged");
        log.push("All alarms acknowledged");
    }

    /// Swap a shelf's alarms in `severities` for an authoritative snapshot
    ///
    /// Records for other shelves are untouched. Keys present both before and
    /// after keep their `raised_at` and are not re-logged; their
    /// acknowledgement follows the snapshot.
    pub fn replace_for_shelf(
        &mut self,
        severities: &[Severity],
        shelf: usize,
        new_alarms: impl IntoIterator<Item = NewAlarm>,
        log: &mut EventLog,
    ) -> ReplaceOutcome {
        let mut previous: Vec<Alarm> = Vec::new();
        for severity in severities {
            if let Some(bucket) = self.buckets.get_mut(severity) {
                let (dropped, kept): (Vec<_>, Vec<_>) =
                    bucket.drain(..).partition(|a| a.shelf == shelf);
                *bucket = kept;
                previous.extend(dropped);
            }
        }

        let mut outcome = ReplaceOutcome::default();
        for new in new_alarms {
            if self.get(&new.severity, shelf, &new.name).is_some() {
                continue;
            }
            let existing = previous
                .iter()
                .position(|a| a.severity == new.severity && a.name == new.name)
                .map(|pos| previous.swap_remove(pos));

            match existing {
                Some(mut alarm) => {
                    alarm.description = new.description;
                    alarm.acknowledged = new.acknowledged;
                    self.buckets.entry(alarm.severity.clone()).or_default().push(alarm);
                    outcome.kept += 1;
                }
                None => {
                    self.raise(new.severity, shelf, &new.name, &new.description, new.acknowledged, log);
                    outcome.raised += 1;
                }
            }
        }

        for alarm in &previous {
            debug!("Snapshot cleared [{}] shelf {} {}", alarm.severity, shelf, alarm.name);
            log.push(format!(
                "Alarm cleared: [{}] shelf {} {}",
                alarm.severity, shelf, alarm.name
            ));
        }
        outcome.cleared = previous.len();
        outcome
    }

    /// Drop every alarm whose shelf index is `count` or beyond
    pub fn retain_shelves(&mut self, count: usize) -> usize {
        let mut removed = 0;
        for bucket in self.buckets.values_mut() {
            let before = bucket.len();
            bucket.retain(|a| a.shelf < count);
            removed += before - bucket.len();
        }
        removed
    }

    // ==========================================
    // SECTION 3: QUERIES
    // ==========================================

    /// Alarms of one severity; empty for a severity never seen
    pub fn list(&self, severity: &Severity) -> &[Alarm] {
        self.buckets.get(severity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, severity: &Severity, shelf: usize, name: &str) -> Option<&Alarm> {
        self.list(severity)
            .iter()
            .find(|a| a.shelf == shelf && a.name == name)
    }

    fn get_mut(&mut self, severity: &Severity, shelf: usize, name: &str) -> Option<&mut Alarm> {
        self.buckets
            .get_mut(severity)?
            .iter_mut()
            .find(|a| a.shelf == shelf && a.name == name)
    }

    /// Every severity with a bucket, built-ins first
    pub fn severities(&self) -> Vec<Severity> {
        self.buckets.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alarm> {
        self.buckets.values().flat_map(|b| b.iter())
    }

    pub fn for_shelf(&self, shelf: usize) -> Vec<&Alarm> {
        self.iter().filter(|a| a.shelf == shelf).collect()
    }

    /// Live records regardless of acknowledgement
    pub fn active_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.iter().filter(|a| !a.acknowledged).count()
    }

    /// Snapshot of every bucket keyed by severity name
    pub fn by_severity(&self) -> BTreeMap<String, Vec<Alarm>> {
        self.buckets
            .iter()
            .map(|(severity, alarms)| (severity.to_string(), alarms.clone()))
            .collect()
    }
}

// ==========================================
// SECTION 4: TESTS
// ==========================================
