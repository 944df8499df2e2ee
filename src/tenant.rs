use crate::error::{AppError, Result};
use crate::registry::layout::INDEX_KEY;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant used when a caller does not name one
pub const DEFAULT_TENANT: &str = "default";

const MAX_TENANT_LEN: usize = 128;

/// Isolated customer scope; every registry path is rooted at the tenant id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant id.
    ///
    /// Ids are used as a directory/key prefix, so only ASCII alphanumerics,
    /// `-`, `_` and `.` are accepted and `.`/`..` are rejected. Ids that
    /// would share a path with the pointer index or its temp files (anything
    /// ending in `.json` or containing `.tmp-`) are reserved.
    pub fn parse(raw: &str) -> Result<Self> {
        let id = raw.trim();

        if id.is_empty() {
            return Err(AppError::Validation("tenant id must not be empty".to_string()));
        }
        if id.len() > MAX_TENANT_LEN {
            return Err(AppError::Validation(format!(
                "tenant id exceeds {} characters",
                MAX_TENANT_LEN
            )));
        }
        if id == "." || id == ".." {
            return Err(AppError::Validation(format!("invalid tenant id: {}", id)));
        }
        let lowered = id.to_ascii_lowercase();
        if lowered == INDEX_KEY || lowered.ends_with(".json") || lowered.contains(".tmp-") {
            return Err(AppError::Validation(format!(
                "tenant id {:?} is reserved by the registry",
                id
            )));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(AppError::Validation(format!(
                "tenant id {:?} contains invalid character {:?}",
                id, c
            )));
        }

        Ok(Self(id.to_string()))
    }

    /// Resolve an optional caller-supplied tenant, falling back to `"default"`.
    pub fn resolve(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(id) => Self::parse(id),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self(DEFAULT_TENANT.to_string())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
