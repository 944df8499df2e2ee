//! Key layout of the registry inside a `ModelStore`:
//! `{tenant}/model_v{version}.bin`, `{tenant}/metadata_v{version}.json`
//! and a single `registry.json` pointer index.

use crate::registry::VersionId;

pub const INDEX_KEY: &str = "registry.json";

const MODEL_PREFIX: &str = "model_v";
const MODEL_SUFFIX: &str = ".bin";

pub fn tenant_prefix(tenant: &str) -> String {
    format!("{}/", tenant)
}

pub fn model_key(tenant: &str, version: &VersionId) -> String {
    format!("{}/{}{}{}", tenant, MODEL_PREFIX, version, MODEL_SUFFIX)
}

pub fn metadata_key(tenant: &str, version: &VersionId) -> String {
    format!("{}/metadata_v{}.json", tenant, version)
}

/// Version id of an artifact key under `tenant`, if the key is one
pub fn parse_model_key(tenant: &str, key: &str) -> Option<VersionId> {
    key.strip_prefix(tenant)?
        .strip_prefix('/')?
        .strip_prefix(MODEL_PREFIX)?
        .strip_suffix(MODEL_SUFFIX)
        .filter(|v| is_valid_version(v))
        .map(VersionId::new)
}

/// Version strings that can be embedded in a key
pub fn is_valid_version(raw: &str) -> bool {
    !raw.is_empty()
        && !raw.starts_with('.')
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
