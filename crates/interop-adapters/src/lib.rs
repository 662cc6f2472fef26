//! Source adapters for the interop ingestion broker.
//!
//! Each external agency has one adapter that validates its payloads
//! against the agency's contract and publishes canonical events into the
//! shared [`EventBroker`](interop_core::EventBroker).

pub mod adapter;
pub mod contract;
pub mod fire_ems;
pub mod moi;
pub mod municipal;
pub mod outcome;
pub mod payload;
pub mod router;
pub mod traffic;

pub use adapter::SourceAdapter;
pub use contract::RecordKind;
pub use fire_ems::FireEmsAdapter;
pub use moi::MoiAdapter;
pub use municipal::MunicipalAdapter;
pub use outcome::{IngestOutcome, ValidationError};
pub use payload::PayloadReader;
pub use router::AdapterSet;
pub use traffic::TrafficAdapter;
