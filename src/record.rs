//! Telemetry keys, classes, and records.
//!
//! A `TelemetryKey` addresses exactly one channel within its class. Keys are
//! declared by the device's metadata at session activation; they are never
//! created on the fly by a subscribe or a stray message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Stable identifier for a telemetry channel (a property id or an event id).
///
/// Equality and hashing are by value; uniqueness is per class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryKey(String);

impl TelemetryKey {
    /// Wrap an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The underlying identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TelemetryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TelemetryKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The two fixed telemetry classes a device exposes.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryClass {
    Property,
    Event,
}

impl TelemetryClass {
    /// The payload field the routing key lives under on the wire.
    #[must_use]
    pub const fn key_field(self) -> &'static str {
        match self {
            Self::Property => "property",
            Self::Event => "event",
        }
    }
}

impl std::fmt::Display for TelemetryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key_field())
    }
}

/// Where a record entered the session: the bootstrap batch or a live stream.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Historical,
    Live,
}

/// A single telemetry sample delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Channel this sample belongs to.
    pub key: TelemetryKey,
    /// Class of the channel.
    pub class: TelemetryClass,
    /// Source-assigned sample time.
    pub timestamp: DateTime<Utc>,
    /// Class-dependent payload.
    pub value: Value,
    /// Bootstrap batch or live stream.
    pub origin: RecordOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_equality_is_by_value() {
        let a = TelemetryKey::new("temp");
        let b = TelemetryKey::from("temp");
        assert_eq!(a, b);
        assert_ne!(a, TelemetryKey::new("humidity"));
    }

    #[test]
    fn class_names_match_wire_fields() {
        assert_eq!(TelemetryClass::Property.key_field(), "property");
        assert_eq!(TelemetryClass::Event.key_field(), "event");
    }

    #[test]
    fn key_serializes_transparently() {
        let key = TelemetryKey::new("temp");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"temp\"");
    }
}
