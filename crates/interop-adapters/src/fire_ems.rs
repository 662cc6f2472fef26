//! Fire & EMS adapter: fire incidents and ambulance deployments.

use std::sync::Arc;

use interop_core::{CanonicalIncidentEvent, EventBroker, IncidentSource};
use serde_json::Value;

use crate::adapter::{SourceAdapter, compose_description};
use crate::contract::RecordKind;
use crate::outcome::{IngestOutcome, ValidationError};
use crate::payload::PayloadReader;

const KINDS: &[RecordKind] = &[RecordKind::FireIncident, RecordKind::AmbulanceDeployment];

pub struct FireEmsAdapter {
    broker: Arc<EventBroker>,
}

impl FireEmsAdapter {
    pub fn new(broker: Arc<EventBroker>) -> Self {
        Self { broker }
    }

    pub fn ingest_fire_incident(&self, payload: &Value) -> IngestOutcome {
        self.ingest(RecordKind::FireIncident, payload)
    }

    pub fn ingest_ambulance_deployment(&self, payload: &Value) -> IngestOutcome {
        self.ingest(RecordKind::AmbulanceDeployment, payload)
    }

    fn fire_incident(
        &self,
        reader: &PayloadReader<'_>,
    ) -> Result<CanonicalIncidentEvent, ValidationError> {
        let incident_id = reader.required_str("incident_id")?;
        let fire_type = reader.required_str("fire_type")?;
        let severity = reader.required_str("severity")?;
        let location = reader.required_str("location")?;
        let (lat, lon) = reader.coordinates()?;
        let timestamp = reader.timestamp("timestamp")?;
        let units = reader.required_count("units_dispatched")?;
        reader.required_f64("response_time")?;

        let description = match reader.optional_str("description")? {
            Some(description) => description,
            None => compose_description([
                format!("{fire_type} fire"),
                format!("{units} unit{} dispatched", if units == 1 { "" } else { "s" }),
            ]),
        };

        CanonicalIncidentEvent::builder(IncidentSource::FireEms, "fire_incident", incident_id)
            .location(lat, lon)
            .timestamp(timestamp)
            .zone(Some(location))
            .governorate(reader.optional_str("governorate")?)
            .severity(Some(severity))
            .description(Some(description))
            .raw_payload(reader.fields().clone())
            .build()
            .map_err(ValidationError::from)
    }

    fn ambulance_deployment(
        &self,
        reader: &PayloadReader<'_>,
    ) -> Result<CanonicalIncidentEvent, ValidationError> {
        let deployment_id = reader.required_str("deployment_id")?;
        let call_type = reader.required_str("call_type")?;
        let priority = reader.required_str("priority")?;
        let location = reader.required_str("location")?;
        let (lat, lon) = reader.coordinates()?;
        let timestamp = reader.timestamp("timestamp")?;
        reader.required_f64("response_time")?;
        let hospital = reader.required_str("hospital")?;

        let description = match reader.optional_str("description")? {
            Some(description) => description,
            None => compose_description([
                format!("{call_type} call"),
                format!("transport to {hospital}"),
            ]),
        };

        CanonicalIncidentEvent::builder(
            IncidentSource::FireEms,
            "ambulance_deployment",
            deployment_id,
        )
        .location(lat, lon)
        .timestamp(timestamp)
        .zone(Some(location))
        .governorate(reader.optional_str("governorate")?)
        .severity(Some(priority))
        .description(Some(description))
        .raw_payload(reader.fields().clone())
        .build()
        .map_err(ValidationError::from)
    }
}

impl SourceAdapter for FireEmsAdapter {
    fn source(&self) -> IncidentSource {
        IncidentSource::FireEms
    }

    fn kinds(&self) -> &'static [RecordKind] {
        KINDS
    }

    fn broker(&self) -> &EventBroker {
        &self.broker
    }

    fn normalize(
        &self,
        kind: RecordKind,
        payload: &PayloadReader<'_>,
    ) -> Result<CanonicalIncidentEvent, ValidationError> {
        match kind {
            RecordKind::FireIncident => self.fire_incident(payload),
            RecordKind::AmbulanceDeployment => self.ambulance_deployment(payload),
            other => Err(ValidationError::UnsupportedRecord {
                adapter: IncidentSource::FireEms,
                kind: other,
            }),
        }
    }
}
