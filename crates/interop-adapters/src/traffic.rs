//! Traffic department adapter.

use std::sync::Arc;

use interop_core::{CanonicalIncidentEvent, EventBroker, IncidentSource};
use serde_json::Value;

use crate::adapter::{SourceAdapter, normalize_standard};
use crate::contract::RecordKind;
use crate::outcome::{IngestOutcome, ValidationError};
use crate::payload::PayloadReader;

const KINDS: &[RecordKind] = &[RecordKind::TrafficIncident];

pub struct TrafficAdapter {
    broker: Arc<EventBroker>,
}

impl TrafficAdapter {
    pub fn new(broker: Arc<EventBroker>) -> Self {
        Self { broker }
    }

    pub fn ingest_incident(&self, payload: &Value) -> IngestOutcome {
        self.ingest(RecordKind::TrafficIncident, payload)
    }
}

impl SourceAdapter for TrafficAdapter {
    fn source(&self) -> IncidentSource {
        IncidentSource::Traffic
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
        normalize_standard(kind, payload)
    }
}
