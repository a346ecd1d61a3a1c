//! Shared types for the presence gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype wrapper for subject (patron) IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of a presence event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Entry,
    Exit,
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(EntryKind::Entry),
            "exit" => Ok(EntryKind::Exit),
            other => Err(other.to_string()),
        }
    }
}

impl EntryKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Entry => "entry",
            EntryKind::Exit => "exit",
        }
    }
}

/// Per-signal sub-scores (0-100), `None` when the signal was not supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignalScores {
    pub gps: Option<u8>,
    pub wifi: Option<u8>,
    pub motion: Option<u8>,
}

impl SignalScores {
    /// Number of signals that were present
    pub fn present_count(&self) -> usize {
        [self.gps, self.wifi, self.motion].iter().filter(|s| s.is_some()).count()
    }
}

/// Accepted presence event
///
/// Created by the evaluator when a submission is accepted; the append-only
/// history and the occupancy roster are both fed from these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryEvent {
    pub event_id: Uuid,
    pub space: String,
    pub subject_id: SubjectId,
    pub kind: EntryKind,
    pub timestamp: DateTime<Utc>,
    pub confidence: u8,
    pub auto_logged: bool,
    #[serde(default)]
    pub manual_confirm: bool,
    pub signals: SignalScores,
}

impl EntryEvent {
    /// Stamp a new event with a UUIDv7 and the current time
    pub fn new(
        space: &str,
        subject_id: SubjectId,
        kind: EntryKind,
        confidence: u8,
        auto_logged: bool,
        manual_confirm: bool,
        signals: SignalScores,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            space: space.to_string(),
            subject_id,
            kind,
            timestamp: Utc::now(),
            confidence,
            auto_logged,
            manual_confirm,
            signals,
        }
    }

    /// Override the timestamp (replay and tests)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Raw submission body as it arrives over HTTP
///
/// Every field is optional at the wire level so that validation can report
/// what is missing instead of failing inside serde.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequest {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub entry_type: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default, rename = "wifiSSID", alias = "wifiSsid")]
    pub wifi_ssid: Option<String>,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    #[serde(default)]
    pub manual_confirm: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_from_str() {
        assert_eq!("entry".parse::<EntryKind>().unwrap(), EntryKind::Entry);
        assert_eq!("exit".parse::<EntryKind>().unwrap(), EntryKind::Exit);
        assert_eq!("ENTRY".parse::<EntryKind>().unwrap_err(), "ENTRY");
    }

    #[test]
    fn test_entry_request_wire_names() {
        let body = r#"{
            "subjectId": "patron-7",
            "entryType": "entry",
            "latitude": 37.7749,
            "longitude": -122.4194,
            "wifiSSID": "Library-WiFi",
            "speedKmh": 2.5,
            "manualConfirm": false
        }"#;
        let req: EntryRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.subject_id.as_deref(), Some("patron-7"));
        assert_eq!(req.entry_type.as_deref(), Some("entry"));
        assert_eq!(req.wifi_ssid.as_deref(), Some("Library-WiFi"));
        assert_eq!(req.speed_kmh, Some(2.5));
        assert_eq!(req.manual_confirm, Some(false));
    }

    #[test]
    fn test_entry_event_json_shape() {
        let event = EntryEvent::new(
            "main-hall",
            SubjectId::new("patron-7"),
            EntryKind::Exit,
            91,
            true,
            false,
            SignalScores { gps: Some(100), wifi: None, motion: Some(70) },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["subjectId"], "patron-7");
        assert_eq!(value["kind"], "exit");
        assert_eq!(value["autoLogged"], true);
        assert_eq!(value["signals"]["wifi"], serde_json::Value::Null);

        let back: EntryEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_present_count() {
        let scores = SignalScores { gps: Some(0), wifi: None, motion: Some(100) };
        assert_eq!(scores.present_count(), 2);
        assert_eq!(SignalScores::default().present_count(), 0);
    }
}
