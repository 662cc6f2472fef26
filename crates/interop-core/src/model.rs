//! Canonical incident model shared by every adapter and consumer.
//!
//! Each external agency submits its own payload shape. Adapters translate
//! those payloads into a [`CanonicalIncidentEvent`], which is the only
//! representation the broker and its consumers ever see.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::{CoreError, Result};
use crate::id::generate_id;
use crate::time::IncidentTimestamp;

pub const DEFAULT_GOVERNORATE: &str = "unknown";
pub const DEFAULT_ZONE: &str = "unknown";
pub const DEFAULT_SEVERITY: &str = "medium";
pub const DEFAULT_DESCRIPTION: &str = "";

/// External agency that produced an incident report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentSource {
    /// Ministry of Interior (police)
    Moi,
    FireEms,
    Traffic,
    Municipal,
}

impl IncidentSource {
    pub const ALL: [IncidentSource; 4] = [
        IncidentSource::Moi,
        IncidentSource::FireEms,
        IncidentSource::Traffic,
        IncidentSource::Municipal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Moi => "MOI",
            Self::FireEms => "FIRE_EMS",
            Self::Traffic => "TRAFFIC",
            Self::Municipal => "MUNICIPAL",
        }
    }
}

impl fmt::Display for IncidentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MOI" => Ok(Self::Moi),
            "FIRE_EMS" => Ok(Self::FireEms),
            "TRAFFIC" => Ok(Self::Traffic),
            "MUNICIPAL" => Ok(Self::Municipal),
            _ => Err(CoreError::invalid_source(s)),
        }
    }
}

/// Identity used to recognise resubmissions of the same incident.
///
/// Natural keys are only unique per record kind, so a municipal hazard and
/// a complaint that share an id are distinct incidents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupeKey {
    pub source: IncidentSource,
    pub record_kind: String,
    pub incident_id: String,
}

impl DedupeKey {
    pub fn new(
        source: IncidentSource,
        record_kind: impl Into<String>,
        incident_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            record_kind: record_kind.into(),
            incident_id: incident_id.into(),
        }
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.record_kind, self.incident_id)
    }
}

/// Normalized, source-agnostic incident event.
///
/// Created once per unique [`DedupeKey`] and never mutated
/// afterwards; consumers receive it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalIncidentEvent {
    pub event_id: String,
    pub source: IncidentSource,
    pub event_type: String,
    /// Kind of submission the event came from, e.g. `hazard_report`.
    #[serde(default)]
    pub record_kind: String,
    pub incident_id: String,
    pub governorate: String,
    pub zone: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub severity: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    /// Original submitted fields, kept for audit
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw_payload: Map<String, Value>,
}

impl CanonicalIncidentEvent {
    pub fn builder(
        source: IncidentSource,
        event_type: impl Into<String>,
        incident_id: impl Into<String>,
    ) -> CanonicalIncidentEventBuilder {
        CanonicalIncidentEventBuilder::new(source, event_type, incident_id)
    }

    pub fn dedupe_key(&self) -> DedupeKey {
        DedupeKey::new(
            self.source,
            self.record_kind.clone(),
            self.incident_id.clone(),
        )
    }

    /// Project onto the cross-agency schema.
    pub fn to_standard(&self) -> StandardIncident {
        StandardIncident {
            incident_type: self.event_type.clone(),
            governorate: self.governorate.clone(),
            zone: self.zone.clone(),
            lat: self.lat,
            lon: self.lon,
            timestamp: IncidentTimestamp(self.timestamp),
            severity: self.severity.clone(),
            description: self.description.clone(),
        }
    }
}

/// Builder that applies the canonical default-filling rules.
#[derive(Debug, Clone)]
pub struct CanonicalIncidentEventBuilder {
    source: IncidentSource,
    event_type: String,
    record_kind: Option<String>,
    incident_id: String,
    governorate: Option<String>,
    zone: Option<String>,
    lat: f64,
    lon: f64,
    timestamp: Option<OffsetDateTime>,
    severity: Option<String>,
    description: Option<String>,
    raw_payload: Map<String, Value>,
}

impl CanonicalIncidentEventBuilder {
    pub fn new(
        source: IncidentSource,
        event_type: impl Into<String>,
        incident_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            event_type: event_type.into(),
            record_kind: None,
            incident_id: incident_id.into(),
            governorate: None,
            zone: None,
            lat: 0.0,
            lon: 0.0,
            timestamp: None,
            severity: None,
            description: None,
            raw_payload: Map::new(),
        }
    }

    /// Defaults to the event type when not set.
    pub fn record_kind(mut self, record_kind: impl Into<String>) -> Self {
        self.record_kind = Some(record_kind.into());
        self
    }

    pub fn location(mut self, lat: f64, lon: f64) -> Self {
        self.lat = lat;
        self.lon = lon;
        self
    }

    pub fn timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn governorate(mut self, governorate: Option<impl Into<String>>) -> Self {
        self.governorate = governorate.map(Into::into);
        self
    }

    pub fn zone(mut self, zone: Option<impl Into<String>>) -> Self {
        self.zone = zone.map(Into::into);
        self
    }

    pub fn severity(mut self, severity: Option<impl Into<String>>) -> Self {
        self.severity = severity.map(Into::into);
        self
    }

    pub fn description(mut self, description: Option<impl Into<String>>) -> Self {
        self.description = description.map(Into::into);
        self
    }

    pub fn raw_payload(mut self, raw_payload: Map<String, Value>) -> Self {
        self.raw_payload = raw_payload;
        self
    }

    pub fn build(self) -> Result<CanonicalIncidentEvent> {
        if self.incident_id.trim().is_empty() {
            return Err(CoreError::invalid_incident("incident_id must not be empty"));
        }
        if self.event_type.trim().is_empty() {
            return Err(CoreError::invalid_incident("event_type must not be empty"));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoreError::InvalidCoordinate {
                field: "lat",
                value: self.lat,
            });
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(CoreError::InvalidCoordinate {
                field: "lon",
                value: self.lon,
            });
        }
        let timestamp = self
            .timestamp
            .ok_or_else(|| CoreError::invalid_timestamp("timestamp is required"))?;

        let record_kind = self
            .record_kind
            .filter(|kind| !kind.trim().is_empty())
            .unwrap_or_else(|| self.event_type.clone());

        Ok(CanonicalIncidentEvent {
            event_id: generate_id(),
            source: self.source,
            event_type: self.event_type,
            record_kind,
            incident_id: self.incident_id,
            governorate: non_blank_or(self.governorate, DEFAULT_GOVERNORATE),
            zone: non_blank_or(self.zone, DEFAULT_ZONE),
            lat: self.lat,
            lon: self.lon,
            timestamp,
            severity: non_blank_or(self.severity, DEFAULT_SEVERITY).to_ascii_lowercase(),
            description: self.description.unwrap_or_default(),
            received_at: OffsetDateTime::now_utc(),
            raw_payload: self.raw_payload,
        })
    }
}

fn non_blank_or(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn default_unknown() -> String {
    DEFAULT_ZONE.to_string()
}

fn default_severity() -> String {
    DEFAULT_SEVERITY.to_string()
}

/// Canonical cross-agency incident schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardIncident {
    pub incident_type: String,
    #[serde(default = "default_unknown")]
    pub governorate: String,
    #[serde(default = "default_unknown")]
    pub zone: String,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: IncidentTimestamp,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn sample() -> CanonicalIncidentEvent {
        CanonicalIncidentEvent::builder(IncidentSource::FireEms, "fire_incident", "FIRE-1")
            .location(29.3344, 48.0537)
            .timestamp(datetime!(2026-01-16 10:30:00 UTC))
            .zone(Some("Salmiya"))
            .severity(Some("HIGH"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_source_serde_names() {
        assert_eq!(
            serde_json::to_value(IncidentSource::FireEms).unwrap(),
            json!("FIRE_EMS")
        );
        assert_eq!(
            serde_json::from_value::<IncidentSource>(json!("MOI")).unwrap(),
            IncidentSource::Moi
        );
        assert_eq!("municipal".parse::<IncidentSource>().unwrap(), IncidentSource::Municipal);
        assert!("NAVY".parse::<IncidentSource>().is_err());
    }

    #[test]
    fn test_builder_applies_defaults() {
        let event = CanonicalIncidentEvent::builder(IncidentSource::Moi, "theft", "MOI-7")
            .location(29.0, 48.0)
            .timestamp(datetime!(2026-01-16 10:30:00 UTC))
            .zone(None::<String>)
            .governorate(Some("   "))
            .build()
            .unwrap();

        assert_eq!(event.zone, DEFAULT_ZONE);
        assert_eq!(event.governorate, DEFAULT_GOVERNORATE);
        assert_eq!(event.severity, DEFAULT_SEVERITY);
        assert_eq!(event.description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn test_builder_rejects_bad_coordinates() {
        let err = CanonicalIncidentEvent::builder(IncidentSource::Traffic, "crash", "T-1")
            .location(95.0, 48.0)
            .timestamp(datetime!(2026-01-16 10:30:00 UTC))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCoordinate { field: "lat", .. }));

        let err = CanonicalIncidentEvent::builder(IncidentSource::Traffic, "crash", "T-1")
            .location(29.0, f64::NAN)
            .timestamp(datetime!(2026-01-16 10:30:00 UTC))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCoordinate { field: "lon", .. }));
    }

    #[test]
    fn test_builder_requires_timestamp() {
        let err = CanonicalIncidentEvent::builder(IncidentSource::Traffic, "crash", "T-1")
            .location(29.0, 48.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTimestamp(_)));
    }

    #[test]
    fn test_dedupe_key_includes_record_kind() {
        let event = sample();
        assert_eq!(event.record_kind, "fire_incident");
        assert_eq!(event.dedupe_key().to_string(), "FIRE_EMS/fire_incident/FIRE-1");

        let theft = CanonicalIncidentEvent::builder(IncidentSource::Moi, "theft", "MOI-7")
            .record_kind("police_incident")
            .location(29.0, 48.0)
            .timestamp(datetime!(2026-01-16 10:30:00 UTC))
            .build()
            .unwrap();
        assert_eq!(theft.event_type, "theft");
        assert_eq!(
            theft.dedupe_key(),
            DedupeKey::new(IncidentSource::Moi, "police_incident", "MOI-7")
        );
    }

    #[test]
    fn test_severity_is_lowercased() {
        assert_eq!(sample().severity, "high");
    }

    #[test]
    fn test_to_standard_projection() {
        let standard = sample().to_standard();
        assert_eq!(standard.incident_type, "fire_incident");
        assert_eq!(standard.zone, "Salmiya");
        assert_eq!(standard.governorate, "unknown");
        assert_eq!(standard.timestamp.to_string(), "2026-01-16T10:30:00Z");
    }

    #[test]
    fn test_standard_incident_defaults_on_deserialize() {
        let incident: StandardIncident = serde_json::from_value(json!({
            "incident_type": "road_closure",
            "lat": 29.1,
            "lon": 47.9,
            "timestamp": "2026-01-16T10:30:00"
        }))
        .unwrap();
        assert_eq!(incident.governorate, "unknown");
        assert_eq!(incident.zone, "unknown");
        assert_eq!(incident.severity, "medium");
        assert_eq!(incident.description, "");
    }

    #[test]
    fn test_raw_payload_omitted_when_empty() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(value.get("raw_payload").is_none());
        assert_eq!(value["source"], "FIRE_EMS");
        assert_eq!(value["timestamp"], "2026-01-16T10:30:00Z");
    }
}
