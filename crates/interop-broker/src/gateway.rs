//! Authenticated entry point for agency submissions.

use std::sync::Arc;
use std::time::Duration;

use interop_adapters::{AdapterSet, IngestOutcome, RecordKind};
use interop_auth::{AuthError, ErrorKind, Permission, ServiceInfo};
use serde_json::Value;

use crate::audit::{AuditAction, AuditTrail};
use crate::manager::InteropManager;

/// A submission refused before it reached an adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl IngestError {
    /// Only throttling is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_retryable(),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Auth(e) => e.retry_after(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(e) => e.kind(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.code(),
        }
    }
}

/// Authenticates, rate limits and routes submissions to their adapter.
pub struct IngestionGateway {
    manager: Arc<InteropManager>,
    adapters: AdapterSet,
    audit: Arc<AuditTrail>,
}

impl IngestionGateway {
    pub fn new(manager: Arc<InteropManager>, adapters: AdapterSet, audit: Arc<AuditTrail>) -> Self {
        Self {
            manager,
            adapters,
            audit,
        }
    }

    /// Submit one record.
    ///
    /// Validation failures come back as `Ok(IngestOutcome::Rejected)`;
    /// `Err` means the caller was not admitted.
    pub fn submit(
        &self,
        api_key: Option<&str>,
        kind: RecordKind,
        payload: &Value,
    ) -> Result<IngestOutcome, IngestError> {
        let caller = self.admit(api_key)?;
        Ok(self.route(&caller, kind, payload))
    }

    /// Submit one record, reading the key from request headers.
    pub fn submit_with_headers<'a, I>(
        &self,
        headers: I,
        kind: RecordKind,
        payload: &Value,
    ) -> Result<IngestOutcome, IngestError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let api_key = self.manager.api_key_config().key_from_headers(headers);
        self.submit(api_key, kind, payload)
    }

    /// Submit several records of one kind as a single request.
    ///
    /// The caller is admitted once; each record gets its own outcome.
    pub fn submit_batch(
        &self,
        api_key: Option<&str>,
        kind: RecordKind,
        payloads: &[Value],
    ) -> Result<Vec<IngestOutcome>, IngestError> {
        let caller = self.admit(api_key)?;
        Ok(payloads
            .iter()
            .map(|payload| self.route(&caller, kind, payload))
            .collect())
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    fn admit(&self, api_key: Option<&str>) -> Result<ServiceInfo, IngestError> {
        Ok(self.manager.authenticate(api_key, Permission::Write)?)
    }

    fn route(&self, caller: &ServiceInfo, kind: RecordKind, payload: &Value) -> IngestOutcome {
        let outcome = self.adapters.ingest(kind, payload);
        if let Some(error) = outcome.validation_error() {
            self.audit.record(
                AuditAction::IngestionRejected,
                Some(&caller.service_name),
                Some(kind.as_str()),
                format!("{}: {error}", error.code()),
            );
        }
        outcome
    }
}

impl std::fmt::Debug for IngestionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionGateway")
            .field("api_key_header", &self.manager.api_key_header())
            .finish_non_exhaustive()
    }
}
