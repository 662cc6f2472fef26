//! Inbound ingestion contracts, one per record kind.

use std::fmt;
use std::str::FromStr;

use interop_core::IncidentSource;
use serde::{Deserialize, Serialize};

use crate::outcome::ValidationError;

/// Kind of record an agency can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    FireIncident,
    AmbulanceDeployment,
    Complaint,
    HazardReport,
    PoliceIncident,
    TrafficIncident,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::FireIncident,
        RecordKind::AmbulanceDeployment,
        RecordKind::Complaint,
        RecordKind::HazardReport,
        RecordKind::PoliceIncident,
        RecordKind::TrafficIncident,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FireIncident => "fire_incident",
            Self::AmbulanceDeployment => "ambulance_deployment",
            Self::Complaint => "complaint",
            Self::HazardReport => "hazard_report",
            Self::PoliceIncident => "police_incident",
            Self::TrafficIncident => "traffic_incident",
        }
    }

    /// Source that owns this kind of record.
    pub fn source(&self) -> IncidentSource {
        match self {
            Self::FireIncident | Self::AmbulanceDeployment => IncidentSource::FireEms,
            Self::Complaint | Self::HazardReport => IncidentSource::Municipal,
            Self::PoliceIncident => IncidentSource::Moi,
            Self::TrafficIncident => IncidentSource::Traffic,
        }
    }

    /// Canonical event type, when fixed by the kind.
    ///
    /// Standard-schema kinds take the submitted `incident_type` instead.
    pub fn event_type(&self) -> Option<&'static str> {
        match self {
            Self::FireIncident => Some("fire_incident"),
            Self::AmbulanceDeployment => Some("ambulance_deployment"),
            Self::Complaint => Some("complaint"),
            Self::HazardReport => Some("hazard_report"),
            Self::PoliceIncident | Self::TrafficIncident => None,
        }
    }

    /// Field holding the natural key, used as the canonical `incident_id`.
    pub fn key_field(&self) -> &'static str {
        match self {
            Self::AmbulanceDeployment => "deployment_id",
            Self::Complaint => "complaint_id",
            Self::HazardReport => "hazard_id",
            Self::FireIncident | Self::PoliceIncident | Self::TrafficIncident => "incident_id",
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::FireIncident => &[
                "incident_id",
                "fire_type",
                "severity",
                "location",
                "lat",
                "lon",
                "timestamp",
                "units_dispatched",
                "response_time",
            ],
            Self::AmbulanceDeployment => &[
                "deployment_id",
                "call_type",
                "priority",
                "location",
                "lat",
                "lon",
                "timestamp",
                "response_time",
                "hospital",
            ],
            Self::Complaint => &[
                "complaint_id",
                "complaint_type",
                "severity",
                "location",
                "lat",
                "lon",
                "timestamp",
                "description",
            ],
            Self::HazardReport => &[
                "hazard_id",
                "hazard_type",
                "severity",
                "location",
                "lat",
                "lon",
                "timestamp",
                "status",
            ],
            Self::PoliceIncident | Self::TrafficIncident => {
                &["incident_id", "incident_type", "lat", "lon", "timestamp"]
            }
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::InvalidIncident(format!("unknown record kind '{s}'")))
    }
}
