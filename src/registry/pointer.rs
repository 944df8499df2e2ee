use crate::error::Result;
use crate::registry::VersionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which version serves a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePointer {
    pub version: VersionId,
    pub activated_at: DateTime<Utc>,
    #[serde(default, alias = "rollback")]
    pub is_rollback: bool,
}

impl ActivePointer {
    pub fn published(version: VersionId) -> Self {
        Self {
            version,
            activated_at: Utc::now(),
            is_rollback: false,
        }
    }

    pub fn rolled_back(version: VersionId) -> Self {
        Self {
            version,
            activated_at: Utc::now(),
            is_rollback: true,
        }
    }
}

/// Durable tenant -> pointer mapping (`registry.json`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryIndex {
    pointers: BTreeMap<String, ActivePointer>,
}

impl RegistryIndex {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn get(&self, tenant: &str) -> Option<&ActivePointer> {
        self.pointers.get(tenant)
    }

    /// Copy of the index with `tenant` pointing at `pointer`
    pub fn with_pointer(&self, tenant: &str, pointer: ActivePointer) -> Self {
        let mut next = self.clone();
        next.pointers.insert(tenant.to_string(), pointer);
        next
    }

    pub fn tenants(&self) -> impl Iterator<Item = &str> {
        self.pointers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_json_is_keyed_by_tenant() {
        let index = RegistryIndex::default()
            .with_pointer("acme", ActivePointer::published(VersionId::new("1")));

        let json: serde_json::Value = serde_json::from_slice(&index.to_json().unwrap()).unwrap();
        assert_eq!(json["acme"]["version"], "1");
        assert_eq!(json["acme"]["is_rollback"], false);
    }

    #[test]
    fn test_with_pointer_leaves_original_untouched() {
        let base = RegistryIndex::default();
        let next = base.with_pointer("acme", ActivePointer::rolled_back(VersionId::new("1")));

        assert!(base.is_empty());
        assert_eq!(next.len(), 1);
        assert!(next.get("acme").unwrap().is_rollback);
    }

    #[test]
    fn test_reads_legacy_rollback_flag() {
        let json = br#"{"acme":{"version":"20240101120000","activated_at":"2024-01-01T12:00:00Z","rollback":true}}"#;
        let index = RegistryIndex::from_json(json).unwrap();

        let pointer = index.get("acme").unwrap();
        assert!(pointer.is_rollback);
        assert_eq!(pointer.version.as_str(), "20240101120000");
        assert_eq!(index.tenants().collect::<Vec<_>>(), vec!["acme"]);
    }
}
