//! Ministry of Interior (police) adapter.
//!
//! Police incidents arrive in the cross-agency standard schema; the
//! submitted `incident_type` becomes the canonical event type.

use std::sync::Arc;

use interop_core::{CanonicalIncidentEvent, EventBroker, IncidentSource};
use serde_json::Value;

use crate::adapter::{SourceAdapter, normalize_standard};
use crate::contract::RecordKind;
use crate::outcome::{IngestOutcome, ValidationError};
use crate::payload::PayloadReader;

const KINDS: &[RecordKind] = &[RecordKind::PoliceIncident];

pub struct MoiAdapter {
    broker: Arc<EventBroker>,
}

impl MoiAdapter {
    pub fn new(broker: Arc<EventBroker>) -> Self {
        Self { broker }
    }

    pub fn ingest_incident(&self, payload: &Value) -> IngestOutcome {
        self.ingest(RecordKind::PoliceIncident, payload)
    }
}

impl SourceAdapter for MoiAdapter {
    fn source(&self) -> IncidentSource {
        IncidentSource::Moi
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
