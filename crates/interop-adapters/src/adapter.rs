use interop_core::{CanonicalIncidentEvent, EventBroker, IncidentSource, PublishResult};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::contract::RecordKind;
use crate::outcome::{IngestOutcome, ValidationError};
use crate::payload::PayloadReader;

/// Translator from one agency's payloads into canonical events.
///
/// Implementors supply the per-kind field mapping in [`normalize`];
/// [`ingest`] runs the shared validate, normalize and publish flow.
///
/// [`normalize`]: SourceAdapter::normalize
/// [`ingest`]: SourceAdapter::ingest
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> IncidentSource;

    /// Record kinds this adapter accepts.
    fn kinds(&self) -> &'static [RecordKind];

    fn broker(&self) -> &EventBroker;

    /// Map a payload whose required fields are known to be present.
    fn normalize(
        &self,
        kind: RecordKind,
        payload: &PayloadReader<'_>,
    ) -> Result<CanonicalIncidentEvent, ValidationError>;

    fn handles(&self, kind: RecordKind) -> bool {
        self.kinds().contains(&kind)
    }

    /// Validate, normalize and publish one submission.
    ///
    /// Never panics on bad input; every failure comes back as
    /// [`IngestOutcome::Rejected`]. Emits exactly one log line keyed by the
    /// kind's natural key.
    fn ingest(&self, kind: RecordKind, payload: &Value) -> IngestOutcome {
        let source = self.source();
        let key_field = kind.key_field();
        let natural_key = payload
            .get(key_field)
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_default();

        let result = if self.handles(kind) {
            validate_and_build(self, kind, payload)
        } else {
            Err(ValidationError::UnsupportedRecord {
                adapter: source,
                kind,
            })
        };

        let event = match result {
            Ok(event) => event,
            Err(error) => {
                warn!(
                    source = %source,
                    kind = %kind,
                    key_field,
                    natural_key = %natural_key,
                    reason = error.code(),
                    error = %error,
                    "Ingestion rejected"
                );
                return IngestOutcome::rejected(error);
            }
        };

        let incident_id = event.incident_id.clone();
        match self.broker().publish(event) {
            PublishResult::Accepted { event_id, consumers } => {
                info!(
                    source = %source,
                    kind = %kind,
                    key_field,
                    natural_key = %incident_id,
                    event_id = %event_id,
                    consumers,
                    "Incident ingested"
                );
                IngestOutcome::Accepted { event_id }
            }
            PublishResult::Duplicate { existing_event_id } => {
                debug!(
                    source = %source,
                    kind = %kind,
                    key_field,
                    natural_key = %incident_id,
                    existing_event_id = %existing_event_id,
                    "Duplicate incident ignored"
                );
                IngestOutcome::Duplicate { incident_id }
            }
        }
    }
}

fn validate_and_build<A: SourceAdapter + ?Sized>(
    adapter: &A,
    kind: RecordKind,
    payload: &Value,
) -> Result<CanonicalIncidentEvent, ValidationError> {
    let reader = PayloadReader::new(payload)?;
    reader.require_all(kind.required_fields())?;
    adapter.normalize(kind, &reader)
}

/// Normalize a submission that follows the cross-agency standard schema.
///
/// Used by the MOI and Traffic adapters. The event type is the submitted
/// `incident_type`; `zone` falls back to `location` when only the latter is
/// sent.
pub(crate) fn normalize_standard(
    kind: RecordKind,
    reader: &PayloadReader<'_>,
) -> Result<CanonicalIncidentEvent, ValidationError> {
    let incident_id = reader.required_str("incident_id")?;
    let incident_type = reader.required_str("incident_type")?;
    let (lat, lon) = reader.coordinates()?;
    let timestamp = reader.timestamp("timestamp")?;
    let zone = match reader.optional_str("zone")? {
        Some(zone) => Some(zone),
        None => reader.optional_str("location")?,
    };

    CanonicalIncidentEvent::builder(kind.source(), incident_type, incident_id)
        .record_kind(kind.as_str())
        .location(lat, lon)
        .timestamp(timestamp)
        .governorate(reader.optional_str("governorate")?)
        .zone(zone)
        .severity(reader.optional_str("severity")?)
        .description(reader.optional_str("description")?)
        .raw_payload(reader.fields().clone())
        .build()
        .map_err(ValidationError::from)
}

/// Join the non-empty parts of a generated description.
pub(crate) fn compose_description<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .filter(|p| !p.as_ref().trim().is_empty())
        .map(|p| p.as_ref().trim().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
