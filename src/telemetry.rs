// src/telemetry.rs - Controller wire messages
//
// Inbound lines are JSON objects tagged by `type`. Decoding is lenient: a
// bad shelf entry or alarm inside an otherwise valid message is isolated
// instead of rejecting the whole message.

use crate::alarms::{NewAlarm, Severity};
use crate::error::{MonitorError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// INBOUND MESSAGES
// ============================================================================

/// Closed set of messages the reconciler understands
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryMessage {
    /// Full snapshot of every shelf
    Status(StatusMessage),
    /// Single reading for one shelf
    Sample(SampleMessage),
    /// Authoritative alarm list for one shelf
    AlarmSnapshot(AlarmSnapshotMessage),
    /// Controller log line
    Log(LogMessage),
}

impl TelemetryMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryMessage::Status(_) => "STATUS",
            TelemetryMessage::Sample(_) => "SAMPLE",
            TelemetryMessage::AlarmSnapshot(_) => "ALARM_SNAPSHOT",
            TelemetryMessage::Log(_) => "LOG",
        }
    }
}

/// Result of decoding one inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(TelemetryMessage),
    /// Well-formed JSON with a `type` outside the known set
    Unknown { kind: String },
    /// Anything that could not be decoded
    Malformed { raw: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusMessage {
    /// Explicit count, when the controller sends one
    pub shelf_count: Option<usize>,
    pub entries: Vec<ShelfEntry>,
    /// `[fan_life_hours, element_life_hours]`
    pub life_hours: Option<(f64, f64)>,
    /// Top-level fields that were present but unusable and so ignored
    pub ignored: Vec<String>,
}

impl StatusMessage {
    /// Shelf count the store should hold after this message
    pub fn reported_count(&self) -> usize {
        self.shelf_count.unwrap_or(self.entries.len())
    }
}

/// One element of the STATUS `shelves` array
#[derive(Debug, Clone, PartialEq)]
pub enum ShelfEntry {
    Report(ShelfReport),
    Malformed { position: usize, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ShelfReport {
    /// 1-based identity
    #[serde(default)]
    pub shelf: Option<i64>,

    #[serde(default, alias = "temperature")]
    pub temp: Option<f64>,

    /// `[setpoint, upper, lower]`, trailing values optional
    #[serde(default)]
    pub setpoint: Option<Vec<f64>>,

    #[serde(default, rename = "systemOn")]
    pub system_on: Option<bool>,

    #[serde(default, deserialize_with = "lenient_vec")]
    pub alarms: Vec<AlarmReport>,

    #[serde(default, rename = "fanHours")]
    pub fan_hours: Option<f64>,

    #[serde(default, rename = "elementHours")]
    pub element_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AlarmReport {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default, alias = "description")]
    pub desc: Option<String>,
    #[serde(default)]
    pub ack: bool,
}

impl AlarmReport {
    /// Registry form with the controller's defaults filled in
    pub fn to_new_alarm(&self) -> NewAlarm {
        let name = self.name.clone().unwrap_or_else(|| "ALARM".to_string());
        NewAlarm {
            severity: Severity::parse(self.severity.as_deref().unwrap_or("ERROR")),
            description: self.desc.clone().unwrap_or_else(|| name.clone()),
            name,
            acknowledged: self.ack,
        }
    }
}

/// Only alarms flagged active are carried into the registry
pub fn active_alarms(reports: &[AlarmReport]) -> Vec<NewAlarm> {
    reports
        .iter()
        .filter(|a| a.active)
        .map(AlarmReport::to_new_alarm)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SampleMessage {
    #[serde(default)]
    pub shelf: Option<i64>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AlarmSnapshotMessage {
    #[serde(default)]
    pub shelf: Option<i64>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub alarms: Vec<AlarmReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LogMessage {
    /// Unix seconds
    #[serde(default)]
    pub ts: Option<f64>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

#[derive(Deserialize)]
struct RawStatus {
    #[serde(default, alias = "count")]
    shelf_count: Option<JsonValue>,
    #[serde(default)]
    shelves: Option<Vec<JsonValue>>,
    #[serde(default)]
    maintenance: Option<JsonValue>,
}

// Elements that fail to deserialize are dropped; null becomes empty.
fn lenient_vec<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let raw: Option<Vec<JsonValue>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

fn decode_status(value: JsonValue) -> Result<StatusMessage> {
    let raw: RawStatus = serde_json::from_value(value)?;

    let entries = raw
        .shelves
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(position, v)| match serde_json::from_value::<ShelfReport>(v) {
            Ok(report) => ShelfEntry::Report(report),
            Err(e) => ShelfEntry::Malformed {
                position,
                reason: e.to_string(),
            },
        })
        .collect();

    let mut ignored = Vec::new();

    let shelf_count = match raw.shelf_count {
        None | Some(JsonValue::Null) => None,
        Some(value) => {
            let count = value.as_u64().and_then(|n| usize::try_from(n).ok());
            if count.is_none() {
                ignored.push(format!("shelf_count {}", value));
            }
            count
        }
    };

    // Only a list of at least two numbers is merged.
    let life_hours = match raw.maintenance {
        None | Some(JsonValue::Null) => None,
        Some(value) => {
            let pair = match value.as_array().map(Vec::as_slice) {
                Some([fan, element, ..]) => fan.as_f64().zip(element.as_f64()),
                _ => None,
            };
            if pair.is_none() {
                ignored.push(format!("maintenance {}", value));
            }
            pair
        }
    };

    Ok(StatusMessage {
        shelf_count,
        entries,
        life_hours,
        ignored,
    })
}

/// Decode one line from the controller
pub fn decode_line(line: &str) -> Inbound {
    let malformed = |reason: String| Inbound::Malformed {
        raw: line.to_string(),
        reason,
    };

    let value: JsonValue = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return malformed(e.to_string()),
    };
    let Some(kind) = value.get("type").and_then(JsonValue::as_str) else {
        return malformed("missing \"type\" field".to_string());
    };
    let kind = kind.to_ascii_uppercase();

    let decoded = match kind.as_str() {
        "STATUS" => decode_status(value).map(TelemetryMessage::Status),
        "SAMPLE" | "LIVE_TEMP" => serde_json::from_value(value)
            .map(TelemetryMessage::Sample)
            .map_err(MonitorError::from),
        "ALARM_SNAPSHOT" | "ALARM_STATE" => serde_json::from_value(value)
            .map(TelemetryMessage::AlarmSnapshot)
            .map_err(MonitorError::from),
        "LOG" => serde_json::from_value(value)
            .map(TelemetryMessage::Log)
            .map_err(MonitorError::from),
        _ => return Inbound::Unknown { kind: kind.clone() },
    };

    match decoded {
        Ok(message) => Inbound::Message(message),
        Err(e) => malformed(e.to_string()),
    }
}

// ============================================================================
// OUTBOUND COMMANDS
// ============================================================================

/// Fire-and-forget commands sent to the controller
///
/// Shelf identities on the wire are 1-based; constructors take store
/// indices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Set { shelf: usize, value: f64 },
    AckAlarm { shelf: usize, name: String },
    SimulateAlarm { shelf: usize, name: String },
    GetStatus,
}

impl Command {
    pub fn set_setpoint(index: usize, value: f64) -> Self {
        Command::Set {
            shelf: index + 1,
            value,
        }
    }

    pub fn acknowledge(index: usize, name: impl Into<String>) -> Self {
        Command::AckAlarm {
            shelf: index + 1,
            name: name.into(),
        }
    }

    pub fn simulate(index: usize, name: impl Into<String>) -> Self {
        Command::SimulateAlarm {
            shelf: index + 1,
            name: name.into(),
        }
    }

    /// Single JSON line without the trailing newline
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(line: &str) -> TelemetryMessage {
        match decode_line(line) {
            Inbound::Message(m) => m,
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn decodes_status_with_partial_entries() {
        let line = r#"{"type":"STATUS","shelves":[
            {"shelf":1,"temp":74.5,"setpoint":[75,78,72],"systemOn":true,
             "alarms":[{"name":"OVERTEMP_ALARM","severity":"error","active":true,"desc":"hot"},
                       {"name":"IDLE","active":false},
                       "garbage"],
             "fanHours":12.5,"elementHours":9.0},
            {"shelf":"two"}
        ],"maintenance":[2500,3500]}"#;

        let TelemetryMessage::Status(status) = message(line) else {
            panic!("not a status");
        };
        assert_eq!(status.reported_count(), 2);
        assert_eq!(status.life_hours, Some((2500.0, 3500.0)));

        let ShelfEntry::Report(first) = &status.entries[0] else {
            panic!("first entry should decode");
        };
        assert_eq!(first.shelf, Some(1));
        assert_eq!(first.temp, Some(74.5));
        assert_eq!(first.alarms.len(), 2);
        assert_eq!(first.fan_hours, Some(12.5));

        let active = active_alarms(&first.alarms);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, Severity::Error);
        assert_eq!(active[0].description, "hot");

        assert!(matches!(status.entries[1], ShelfEntry::Malformed { position: 1, .. }));
    }

    #[test]
    fn explicit_shelf_count_wins() {
        let TelemetryMessage::Status(status) =
            message(r#"{"type":"STATUS","shelf_count":4,"shelves":[]}"#)
        else {
            panic!("not a status");
        };
        assert_eq!(status.reported_count(), 4);
        assert_eq!(status.life_hours, None);
    }

    #[test]
    fn bad_top_level_fields_do_not_reject_status() {
        let TelemetryMessage::Status(status) = message(
            r#"{"type":"STATUS","shelf_count":-1,"maintenance":[2000,null],
                "shelves":[{"shelf":1,"temp":74.0},{"shelf":2}]}"#,
        ) else {
            panic!("not a status");
        };
        assert_eq!(status.shelf_count, None);
        assert_eq!(status.reported_count(), 2);
        assert_eq!(status.life_hours, None);
        assert_eq!(
            status.ignored,
            vec!["shelf_count -1".to_string(), "maintenance [2000,null]".to_string()]
        );
        assert!(matches!(status.entries[0], ShelfEntry::Report(_)));

        let TelemetryMessage::Status(status) =
            message(r#"{"type":"STATUS","maintenance":"n/a","shelves":[]}"#)
        else {
            panic!("not a status");
        };
        assert_eq!(status.life_hours, None);
        assert_eq!(status.ignored, vec![r#"maintenance "n/a""#.to_string()]);

        let TelemetryMessage::Status(status) =
            message(r#"{"type":"STATUS","maintenance":[2500],"shelves":[]}"#)
        else {
            panic!("not a status");
        };
        assert_eq!(status.life_hours, None);
    }

    #[test]
    fn accepts_legacy_kind_names() {
        assert!(matches!(
            message(r#"{"type":"LIVE_TEMP","shelf":2,"value":71.0}"#),
            TelemetryMessage::Sample(SampleMessage { shelf: Some(2), value: Some(_) })
        ));
        assert!(matches!(
            message(r#"{"type":"alarm_state","shelf":1,"alarms":null}"#),
            TelemetryMessage::AlarmSnapshot(_)
        ));
    }

    #[test]
    fn alarm_defaults() {
        let report = AlarmReport {
            active: true,
            ..Default::default()
        };
        let alarm = report.to_new_alarm();
        assert_eq!(alarm.name, "ALARM");
        assert_eq!(alarm.description, "ALARM");
        assert_eq!(alarm.severity, Severity::Error);
        assert!(!alarm.acknowledged);
    }

    #[test]
    fn unknown_and_malformed_lines() {
        assert_eq!(
            decode_line(r#"{"type":"HEARTBEAT"}"#),
            Inbound::Unknown { kind: "HEARTBEAT".into() }
        );
        assert!(matches!(decode_line("booting..."), Inbound::Malformed { .. }));
        assert!(matches!(decode_line(r#"{"shelf":1}"#), Inbound::Malformed { .. }));
        assert!(matches!(
            decode_line(r#"{"type":"SAMPLE","value":"warm"}"#),
            Inbound::Malformed { .. }
        ));
    }

    #[test]
    fn commands_encode_with_one_based_shelf() {
        assert_eq!(
            Command::set_setpoint(0, 76.5).encode().unwrap(),
            r#"{"type":"SET","shelf":1,"value":76.5}"#
        );
        assert_eq!(
            Command::acknowledge(1, "OVERTEMP").encode().unwrap(),
            r#"{"type":"ACK_ALARM","shelf":2,"name":"OVERTEMP"}"#
        );
        assert_eq!(
            Command::simulate(0, "ELEMENT_ERROR").encode().unwrap(),
            r#"{"type":"SIMULATE_ALARM","shelf":1,"name":"ELEMENT_ERROR"}"#
        );
        assert_eq!(Command::GetStatus.encode().unwrap(), r#"{"type":"GET_STATUS"}"#);
    }
}
