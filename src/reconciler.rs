// src/reconciler.rs - Apply controller telemetry to monitor state
//
// Each message is applied in full against a `&mut MonitorState`; the engine
// holds the state lock for the whole batch. Bad entries are skipped and
// logged, the rest of the message still applies.

use crate::error::{MonitorError, Result};
use crate::shelf::ShelfDefaults;
use crate::state::MonitorState;
use crate::telemetry::{
    active_alarms, decode_line, AlarmReport, AlarmSnapshotMessage, Inbound, LogMessage, SampleMessage,
    ShelfEntry, ShelfReport, StatusMessage, TelemetryMessage,
};
use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Band offset applied when a setpoint arrives without explicit bounds
const DERIVED_BAND: f64 = 2.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub applied: u64,
    pub malformed: u64,
    pub unknown: u64,
    pub skipped_entries: u64,
}

/// Shelf count ceiling when none is configured
pub const DEFAULT_MAX_SHELVES: usize = 64;

#[derive(Debug)]
pub struct Reconciler {
    stats: ReconcileStats,
    max_shelves: usize,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::with_max_shelves(DEFAULT_MAX_SHELVES)
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// STATUS messages reporting more than `max_shelves` are rejected
    pub fn with_max_shelves(max_shelves: usize) -> Self {
        Self {
            stats: ReconcileStats::default(),
            max_shelves,
        }
    }

    pub fn max_shelves(&self) -> usize {
        self.max_shelves
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Decode and apply one raw line; returns `true` if a message applied
    pub fn apply_line(&mut self, state: &mut MonitorState, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        self.apply_inbound(state, decode_line(line))
    }

    pub fn apply_inbound(&mut self, state: &mut MonitorState, inbound: Inbound) -> bool {
        match inbound {
            Inbound::Message(message) => self.apply(state, message),
            Inbound::Unknown { kind } => {
                self.stats.unknown += 1;
                debug!("Ignoring unknown message type {}", kind);
                state.log.push(format!("Ignored unknown message type {}", kind));
                false
            }
            Inbound::Malformed { raw, reason } => {
                self.stats.malformed += 1;
                trace!("Undecodable line ({}): {}", reason, raw);
                state.log.push(format!("RAW: {}", raw));
                false
            }
        }
    }

    /// Record a line the link threw away for exceeding `limit` bytes
    pub fn discard_oversized(&mut self, state: &mut MonitorState, limit: usize) {
        self.stats.malformed += 1;
        state
            .log
            .push(format!("RAW: <line over {} bytes discarded>", limit));
    }

    /// Apply a decoded message; returns `false` if it was rejected whole
    pub fn apply(&mut self, state: &mut MonitorState, message: TelemetryMessage) -> bool {
        trace!("Applying {} message", message.kind());
        let kind = message.kind();
        let result = match message {
            TelemetryMessage::Status(status) => self.apply_status(state, status),
            TelemetryMessage::Sample(sample) => {
                self.apply_sample(state, sample);
                Ok(())
            }
            TelemetryMessage::AlarmSnapshot(snapshot) => {
                self.apply_alarm_snapshot(state, snapshot);
                Ok(())
            }
            TelemetryMessage::Log(entry) => {
                apply_log(state, entry);
                Ok(())
            }
        };
        match result {
            Ok(()) => {
                self.stats.applied += 1;
                true
            }
            Err(e) => {
                self.stats.malformed += 1;
                warn!("{} rejected: {}", kind, e);
                state.log.push(format!("{} rejected: {}", kind, e));
                false
            }
        }
    }

    fn apply_status(&mut self, state: &mut MonitorState, status: StatusMessage) -> Result<()> {
        let count = status.reported_count();
        if count > self.max_shelves {
            return Err(MonitorError::Malformed(format!(
                "shelf count {} exceeds the limit of {}",
                count, self.max_shelves
            )));
        }
        for field in &status.ignored {
            warn!("STATUS field ignored: {}", field);
            state.log.push(format!("STATUS field ignored: {}", field));
        }

        state.resize_shelves(count);
        let defaults = *state.shelves.defaults();

        for (position, entry) in status.entries.into_iter().enumerate() {
            let result = match entry {
                ShelfEntry::Report(report) => apply_entry(state, &defaults, position, report),
                ShelfEntry::Malformed { reason, .. } => Err(MonitorError::Malformed(reason)),
            };
            if let Err(e) = result {
                self.stats.skipped_entries += 1;
                warn!("STATUS entry {} skipped: {}", position + 1, e);
                state
                    .log
                    .push(format!("STATUS entry {} skipped: {}", position + 1, e));
            }
        }

        if let Some((fan_life, element_life)) = status.life_hours {
            state
                .maintenance
                .apply_authoritative(None, None, Some(fan_life), Some(element_life));
        }
        state.mark_updated();
        Ok(())
    }

    fn apply_sample(&mut self, state: &mut MonitorState, sample: SampleMessage) {
        let Some(value) = sample.value else {
            self.stats.malformed += 1;
            state.log.push("Sample without value dropped");
            return;
        };
        // A sample without an identity is attributed to the first shelf.
        let identity = sample.shelf.unwrap_or(1);
        let applied = resolve_index(identity, state.shelves.count())
            .and_then(|index| state.shelves.apply_sample(index, value));
        match applied {
            Ok(()) => state.mark_updated(),
            Err(e) => {
                self.stats.skipped_entries += 1;
                warn!("Sample for shelf {} dropped: {}", identity, e);
                state
                    .log
                    .push(format!("Sample for shelf {} dropped: {}", identity, e));
            }
        }
    }

    fn apply_alarm_snapshot(&mut self, state: &mut MonitorState, snapshot: AlarmSnapshotMessage) {
        let identity = snapshot.shelf.unwrap_or(1);
        let index = match resolve_index(identity, state.shelves.count()) {
            Ok(index) => index,
            Err(e) => {
                self.stats.skipped_entries += 1;
                warn!("Alarm snapshot for shelf {} dropped: {}", identity, e);
                state
                    .log
                    .push(format!("Alarm snapshot for shelf {} dropped: {}", identity, e));
                return;
            }
        };
        replace_alarms(state, index, &snapshot.alarms);
        state.mark_updated();
    }
}

/// Map a 1-based wire identity onto a store index
pub fn resolve_index(identity: i64, count: usize) -> Result<usize> {
    if identity < 1 {
        return Err(MonitorError::Malformed(format!(
            "shelf identity {} is not 1-based",
            identity
        )));
    }
    let index = usize::try_from(identity - 1)
        .map_err(|_| MonitorError::Malformed(format!("shelf identity {}", identity)))?;
    if index >= count {
        return Err(MonitorError::OutOfRange { index, count });
    }
    Ok(index)
}

fn apply_entry(
    state: &mut MonitorState,
    defaults: &ShelfDefaults,
    position: usize,
    report: ShelfReport,
) -> Result<()> {
    let identity = report.shelf.unwrap_or(position as i64 + 1);
    let index = resolve_index(identity, state.shelves.count())?;

    let (setpoint, upper, lower) = match report.setpoint.as_deref() {
        Some([setpoint, rest @ ..]) => (
            *setpoint,
            rest.first().copied().unwrap_or(setpoint + DERIVED_BAND),
            rest.get(1).copied().unwrap_or(setpoint - DERIVED_BAND),
        ),
        _ => (defaults.setpoint, defaults.upper, defaults.lower),
    };
    state
        .shelves
        .set_bounds(index, Some(setpoint), Some(upper), Some(lower))?;
    state.shelves.set_power(index, report.system_on.unwrap_or(true))?;

    if let Some(temperature) = report.temp {
        state.shelves.apply_sample(index, temperature)?;
    }

    replace_alarms(state, index, &report.alarms);

    state
        .maintenance
        .apply_authoritative(report.fan_hours, report.element_hours, None, None);
    Ok(())
}

// Every current bucket is in scope so stale alarms of any severity go.
fn replace_alarms(state: &mut MonitorState, index: usize, reports: &[AlarmReport]) {
    let severities = state.alarms.severities();
    let outcome = state
        .alarms
        .replace_for_shelf(&severities, index, active_alarms(reports), &mut state.log);
    trace!(
        "Shelf {} alarms: {} raised, {} kept, {} cleared",
        index,
        outcome.raised,
        outcome.kept,
        outcome.cleared
    );
}

fn apply_log(state: &mut MonitorState, entry: LogMessage) {
    let at = entry.ts.and_then(timestamp_to_local).unwrap_or_else(Local::now);
    let level = entry
        .level
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| "INFO".to_string());
    let msg = entry.msg.unwrap_or_default();
    state.log.push_at(at, format!("{}: {}", level, msg));
}

fn timestamp_to_local(ts: f64) -> Option<DateTime<Local>> {
    if !ts.is_finite() || ts < 0.0 {
        return None;
    }
    let secs = ts.trunc() as i64;
    let nanos = ((ts - ts.trunc()) * 1e9) as u32;
    Local.timestamp_opt(secs, nanos).single()
}
