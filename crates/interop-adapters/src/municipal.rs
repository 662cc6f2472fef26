//! Municipal services adapter: citizen complaints and hazard reports.

use std::sync::Arc;

use interop_core::{CanonicalIncidentEvent, EventBroker, IncidentSource};
use serde_json::Value;

use crate::adapter::{SourceAdapter, compose_description};
use crate::contract::RecordKind;
use crate::outcome::{IngestOutcome, ValidationError};
use crate::payload::PayloadReader;

const KINDS: &[RecordKind] = &[RecordKind::Complaint, RecordKind::HazardReport];

pub struct MunicipalAdapter {
    broker: Arc<EventBroker>,
}

impl MunicipalAdapter {
    pub fn new(broker: Arc<EventBroker>) -> Self {
        Self { broker }
    }

    pub fn ingest_complaint(&self, payload: &Value) -> IngestOutcome {
        self.ingest(RecordKind::Complaint, payload)
    }

    pub fn ingest_hazard_report(&self, payload: &Value) -> IngestOutcome {
        self.ingest(RecordKind::HazardReport, payload)
    }

    fn complaint(
        &self,
        reader: &PayloadReader<'_>,
    ) -> Result<CanonicalIncidentEvent, ValidationError> {
        let complaint_id = reader.required_str("complaint_id")?;
        reader.required_str("complaint_type")?;
        let severity = reader.required_str("severity")?;
        let location = reader.required_str("location")?;
        let (lat, lon) = reader.coordinates()?;
        let timestamp = reader.timestamp("timestamp")?;
        let description = reader.required_str("description")?;

        CanonicalIncidentEvent::builder(IncidentSource::Municipal, "complaint", complaint_id)
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

    fn hazard_report(
        &self,
        reader: &PayloadReader<'_>,
    ) -> Result<CanonicalIncidentEvent, ValidationError> {
        let hazard_id = reader.required_str("hazard_id")?;
        let hazard_type = reader.required_str("hazard_type")?;
        let severity = reader.required_str("severity")?;
        let location = reader.required_str("location")?;
        let (lat, lon) = reader.coordinates()?;
        let timestamp = reader.timestamp("timestamp")?;
        let status = reader.required_str("status")?;

        let description = match reader.optional_str("description")? {
            Some(description) => description,
            None => {
                compose_description([format!("{hazard_type} hazard"), format!("status {status}")])
            }
        };

        CanonicalIncidentEvent::builder(IncidentSource::Municipal, "hazard_report", hazard_id)
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
}

impl SourceAdapter for MunicipalAdapter {
    fn source(&self) -> IncidentSource {
        IncidentSource::Municipal
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
            RecordKind::Complaint => self.complaint(payload),
            RecordKind::HazardReport => self.hazard_report(payload),
            other => Err(ValidationError::UnsupportedRecord {
                adapter: IncidentSource::Municipal,
                kind: other,
            }),
        }
    }
}
