//! API key generation, hashing and storage.
//!
//! # Security
//!
//! - Keys are 256-bit random values (32 bytes) with an "ik_" prefix
//! - Only the SHA-256 hash of a key is stored; the key is returned once
//!   at issuance and never again
//! - Revocation is permanent

use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::AuthError;

pub const API_KEY_PREFIX: &str = "ik_";

/// Generate a new API key.
///
/// # Format
///
/// `ik_{64 hex characters}` (67 characters total)
pub fn generate_api_key() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    format!("{API_KEY_PREFIX}{}", hex::encode(bytes))
}

/// SHA-256 hex digest of a key, as stored.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    /// Implies every other permission.
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            other => Err(AuthError::invalid_request(format!("unknown permission '{other}'"))),
        }
    }
}

fn grants(permissions: &[Permission], required: Permission) -> bool {
    permissions
        .iter()
        .any(|p| *p == required || *p == Permission::Admin)
}

/// Stored API key. Holds the key hash, never the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub service_name: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub permissions: Vec<Permission>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_used_at: Option<OffsetDateTime>,
}

impl ApiKeyRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn has_permission(&self, required: Permission) -> bool {
        grants(&self.permissions, required)
    }

    fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            key_id: self.id.clone(),
            service_name: self.service_name.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// Identity of an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub key_id: String,
    pub service_name: String,
    pub permissions: Vec<Permission>,
}

impl ServiceInfo {
    pub fn has_permission(&self, required: Permission) -> bool {
        grants(&self.permissions, required)
    }
}

/// Result of issuing a key. The only place the plaintext key ever appears.
#[derive(Clone, Serialize)]
pub struct IssuedApiKey {
    pub key_id: String,
    pub service_name: String,
    pub api_key: String,
    pub permissions: Vec<Permission>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl fmt::Debug for IssuedApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedApiKey")
            .field("key_id", &self.key_id)
            .field("service_name", &self.service_name)
            .field("api_key", &"[REDACTED]")
            .field("permissions", &self.permissions)
            .finish()
    }
}

/// In-memory key store indexed by key hash.
#[derive(Debug, Default)]
pub struct ApiKeyStore {
    by_hash: DashMap<String, ApiKeyRecord>,
    hash_by_id: DashMap<String, String>,
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a key for `service_name`. A service may hold several keys.
    pub fn issue(
        &self,
        service_name: &str,
        permissions: &[Permission],
    ) -> Result<IssuedApiKey, AuthError> {
        let service_name = service_name.trim();
        if service_name.is_empty() {
            return Err(AuthError::invalid_request("service_name must not be empty"));
        }
        if permissions.is_empty() {
            return Err(AuthError::invalid_request("at least one permission is required"));
        }

        let mut permissions = permissions.to_vec();
        permissions.sort();
        permissions.dedup();

        let api_key = generate_api_key();
        let record = ApiKeyRecord {
            id: uuid::Uuid::new_v4().to_string(),
            service_name: service_name.to_string(),
            key_hash: hash_api_key(&api_key),
            permissions: permissions.clone(),
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
            last_used_at: None,
        };

        let issued = IssuedApiKey {
            key_id: record.id.clone(),
            service_name: record.service_name.clone(),
            api_key,
            permissions,
            created_at: record.created_at,
        };

        self.hash_by_id
            .insert(record.id.clone(), record.key_hash.clone());
        self.by_hash.insert(record.key_hash.clone(), record);

        info!(
            key_id = %issued.key_id,
            service = %issued.service_name,
            "API key issued"
        );
        Ok(issued)
    }

    /// Resolve a key to its service. `None` for unknown or revoked keys.
    pub fn validate(&self, api_key: &str) -> Option<ServiceInfo> {
        self.lookup(api_key).ok()
    }

    /// Resolve a key and check it carries `required`.
    pub fn authenticate(
        &self,
        api_key: Option<&str>,
        required: Permission,
    ) -> Result<ServiceInfo, AuthError> {
        let api_key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AuthError::MissingApiKey)?;
        let info = self.lookup(api_key)?;
        if !info.has_permission(required) {
            return Err(AuthError::InsufficientPermission {
                service: info.service_name,
                required,
            });
        }
        Ok(info)
    }

    fn lookup(&self, api_key: &str) -> Result<ServiceInfo, AuthError> {
        let mut record = self
            .by_hash
            .get_mut(&hash_api_key(api_key))
            .ok_or(AuthError::InvalidApiKey)?;
        if record.is_revoked() {
            debug!(key_id = %record.id, "Revoked API key presented");
            return Err(AuthError::RevokedApiKey {
                key_id: record.id.clone(),
            });
        }
        record.last_used_at = Some(OffsetDateTime::now_utc());
        Ok(record.service_info())
    }

    /// Permanently revoke a key. Revoking twice keeps the first timestamp.
    pub fn revoke(&self, key_id: &str) -> Result<ApiKeyRecord, AuthError> {
        let hash = self
            .hash_by_id
            .get(key_id)
            .map(|h| h.value().clone())
            .ok_or_else(|| AuthError::UnknownKey {
                key_id: key_id.to_string(),
            })?;
        let mut record = self
            .by_hash
            .get_mut(&hash)
            .ok_or_else(|| AuthError::UnknownKey {
                key_id: key_id.to_string(),
            })?;
        if record.revoked_at.is_none() {
            record.revoked_at = Some(OffsetDateTime::now_utc());
            info!(key_id = %key_id, service = %record.service_name, "API key revoked");
        }
        Ok(record.clone())
    }

    pub fn get(&self, key_id: &str) -> Option<ApiKeyRecord> {
        let hash = self.hash_by_id.get(key_id)?;
        self.by_hash.get(hash.value()).map(|r| r.clone())
    }

    pub fn list_for_service(&self, service_name: &str) -> Vec<ApiKeyRecord> {
        let mut records: Vec<_> = self
            .by_hash
            .iter()
            .filter(|r| r.service_name == service_name)
            .map(|r| r.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_generate_api_key_format() {
        let key = generate_api_key();
        assert_eq!(key.len(), 67);
        assert!(key.starts_with(API_KEY_PREFIX));
        assert!(key[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_api_key());
    }

    #[test]
    fn test_hash_is_stable_sha256() {
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_issue_and_validate() {
        let store = ApiKeyStore::new();
        let issued = assert_ok!(store.issue("fire-ems", &[Permission::Write, Permission::Read]));

        let info = store.validate(&issued.api_key).unwrap();
        assert_eq!(info.service_name, "fire-ems");
        assert_eq!(info.key_id, issued.key_id);
        assert_eq!(info.permissions, vec![Permission::Read, Permission::Write]);

        let record = store.get(&issued.key_id).unwrap();
        assert_ne!(record.key_hash, issued.api_key);
        assert!(record.last_used_at.is_some());
    }

    #[test]
    fn test_unknown_key_fails_validation() {
        let store = ApiKeyStore::new();
        store.issue("moi", &[Permission::Write]).unwrap();
        assert!(store.validate("ik_not-a-real-key").is_none());
        assert_eq!(
            store.authenticate(Some("ik_nope"), Permission::Read),
            Err(AuthError::InvalidApiKey)
        );
        assert_eq!(
            store.authenticate(None, Permission::Read),
            Err(AuthError::MissingApiKey)
        );
        assert_eq!(
            store.authenticate(Some("  "), Permission::Read),
            Err(AuthError::MissingApiKey)
        );
    }

    #[test]
    fn test_revoked_key_fails_permanently() {
        let store = ApiKeyStore::new();
        let issued = store.issue("traffic", &[Permission::Write]).unwrap();

        let revoked = assert_ok!(store.revoke(&issued.key_id));
        let first_revoked_at = revoked.revoked_at;
        assert!(first_revoked_at.is_some());

        assert!(store.validate(&issued.api_key).is_none());
        let err = assert_err!(store.authenticate(Some(&issued.api_key), Permission::Write));
        assert!(matches!(err, AuthError::RevokedApiKey { .. }));

        let again = assert_ok!(store.revoke(&issued.key_id));
        assert_eq!(again.revoked_at, first_revoked_at);
    }

    #[test]
    fn test_revoke_unknown_key() {
        let store = ApiKeyStore::new();
        let err = assert_err!(store.revoke("missing"));
        assert_eq!(err.code(), "unknown_key");
    }

    #[test]
    fn test_permission_checks() {
        let store = ApiKeyStore::new();
        let reader = store.issue("dashboard", &[Permission::Read]).unwrap();
        let admin = store.issue("ops", &[Permission::Admin]).unwrap();

        let err = assert_err!(store.authenticate(Some(&reader.api_key), Permission::Write));
        assert_eq!(
            err,
            AuthError::InsufficientPermission {
                service: "dashboard".into(),
                required: Permission::Write,
            }
        );
        assert_ok!(store.authenticate(Some(&admin.api_key), Permission::Write));
    }

    #[test]
    fn test_issue_validation() {
        let store = ApiKeyStore::new();
        assert_err!(store.issue("  ", &[Permission::Read]));
        assert_err!(store.issue("moi", &[]));
        assert!(store.is_empty());
    }

    #[test]
    fn test_service_may_hold_several_keys() {
        let store = ApiKeyStore::new();
        let first = store.issue("municipal", &[Permission::Write]).unwrap();
        let second = store.issue("municipal", &[Permission::Write]).unwrap();
        assert_ne!(first.api_key, second.api_key);
        assert_eq!(store.list_for_service("municipal").len(), 2);
    }

    #[test]
    fn test_issued_key_debug_is_redacted() {
        let store = ApiKeyStore::new();
        let issued = store.issue("moi", &[Permission::Write]).unwrap();
        let debug = format!("{issued:?}");
        assert!(!debug.contains(&issued.api_key));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_record_serialization_omits_hash() {
        let store = ApiKeyStore::new();
        let issued = store.issue("moi", &[Permission::Write]).unwrap();
        let value = serde_json::to_value(store.get(&issued.key_id).unwrap()).unwrap();
        assert!(value.get("key_hash").is_none());
        assert_eq!(value["permissions"], serde_json::json!(["write"]));
    }

    #[test]
    fn test_permission_parsing() {
        assert_eq!("Admin".parse::<Permission>().unwrap(), Permission::Admin);
        assert!("root".parse::<Permission>().is_err());
    }
}
