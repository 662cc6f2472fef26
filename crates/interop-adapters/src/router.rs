//! Routes a record kind to the adapter that owns it.

use std::sync::Arc;

use interop_core::{EventBroker, IncidentSource};
use serde_json::Value;

use crate::adapter::SourceAdapter;
use crate::contract::RecordKind;
use crate::fire_ems::FireEmsAdapter;
use crate::moi::MoiAdapter;
use crate::municipal::MunicipalAdapter;
use crate::outcome::IngestOutcome;
use crate::traffic::TrafficAdapter;

/// The four source adapters, sharing one broker.
pub struct AdapterSet {
    moi: MoiAdapter,
    fire_ems: FireEmsAdapter,
    traffic: TrafficAdapter,
    municipal: MunicipalAdapter,
}

impl AdapterSet {
    pub fn new(broker: Arc<EventBroker>) -> Self {
        Self {
            moi: MoiAdapter::new(broker.clone()),
            fire_ems: FireEmsAdapter::new(broker.clone()),
            traffic: TrafficAdapter::new(broker.clone()),
            municipal: MunicipalAdapter::new(broker),
        }
    }

    pub fn for_source(&self, source: IncidentSource) -> &dyn SourceAdapter {
        match source {
            IncidentSource::Moi => &self.moi,
            IncidentSource::FireEms => &self.fire_ems,
            IncidentSource::Traffic => &self.traffic,
            IncidentSource::Municipal => &self.municipal,
        }
    }

    pub fn for_kind(&self, kind: RecordKind) -> &dyn SourceAdapter {
        self.for_source(kind.source())
    }

    pub fn ingest(&self, kind: RecordKind, payload: &Value) -> IngestOutcome {
        self.for_kind(kind).ingest(kind, payload)
    }

    pub fn moi(&self) -> &MoiAdapter {
        &self.moi
    }

    pub fn fire_ems(&self) -> &FireEmsAdapter {
        &self.fire_ems
    }

    pub fn traffic(&self) -> &TrafficAdapter {
        &self.traffic
    }

    pub fn municipal(&self) -> &MunicipalAdapter {
        &self.municipal
    }
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSet").finish_non_exhaustive()
    }
}
