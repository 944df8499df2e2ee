use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const ID_LEN: usize = 20;

/// Identifier of one trained artifact within a tenant.
///
/// Allocated ids are 20-digit UTC timestamps (`YYYYMMDDhhmmss` + microseconds),
/// so lexicographic order equals chronological order. Ids read back from
/// storage are kept verbatim even if they predate that format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    /// Build the id for a UTC instant (microsecond resolution)
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}{:06}",
            at.format(STAMP_FORMAT),
            at.timestamp_subsec_micros().min(999_999)
        ))
    }

    fn from_micros(micros: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_micros(micros).map(Self::from_timestamp)
    }

    /// Wrap an id read from a key or a caller; no format is enforced
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Microseconds since the epoch, if the id uses the allocated format
    pub fn micros(&self) -> Option<i64> {
        if self.0.len() != ID_LEN || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let (stamp, fraction) = self.0.split_at(ID_LEN - 6);
        let seconds = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
        let fraction: i64 = fraction.parse().ok()?;
        Some(seconds.and_utc().timestamp() * 1_000_000 + fraction)
    }

    /// Creation instant encoded in the id
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.micros().and_then(DateTime::<Utc>::from_timestamp_micros)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VersionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VersionId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Hands out strictly increasing version ids per tenant.
///
/// When the clock has not advanced past the last id (same microsecond,
/// clock step backwards) the next id is the last one plus one microsecond.
#[derive(Debug, Default)]
pub struct VersionAllocator {
    last_issued: DashMap<String, i64>,
}

impl VersionAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this tenant has been seeded or allocated from already
    pub fn is_seeded(&self, tenant: &str) -> bool {
        self.last_issued.contains_key(tenant)
    }

    /// Record ids that already exist in storage so new ids sort after them
    pub fn seed<'a>(&self, tenant: &str, existing: impl IntoIterator<Item = &'a VersionId>) {
        let newest = existing.into_iter().filter_map(VersionId::micros).max();
        let mut entry = self.last_issued.entry(tenant.to_string()).or_insert(i64::MIN);
        if let Some(newest) = newest {
            *entry = (*entry).max(newest);
        }
    }

    /// Allocate the next id for `tenant` at instant `now`
    pub fn next_at(&self, tenant: &str, now: DateTime<Utc>) -> VersionId {
        let mut entry = self.last_issued.entry(tenant.to_string()).or_insert(i64::MIN);
        let candidate = now.timestamp_micros();
        let micros = if candidate > *entry { candidate } else { *entry + 1 };
        *entry = micros;

        VersionId::from_micros(micros).unwrap_or_else(|| VersionId::from_timestamp(now))
    }

    pub fn next(&self, tenant: &str) -> VersionId {
        self.next_at(tenant, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_and_roundtrip() {
        let at = Utc
            .with_ymd_and_hms(2024, 3, 5, 7, 8, 9)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(42))
            .unwrap();
        let id = VersionId::from_timestamp(at);

        assert_eq!(id.as_str(), "20240305070809000042");
        assert_eq!(id.timestamp(), Some(at));
    }

    #[test]
    fn test_legacy_ids_have_no_timestamp() {
        assert_eq!(VersionId::new("20240101120000").micros(), None);
        assert_eq!(VersionId::new("not-a-version").micros(), None);
    }

    #[test]
    fn test_same_instant_allocations_are_distinct_and_ordered() {
        let allocator = VersionAllocator::new();
        let now = Utc::now();

        let ids: Vec<VersionId> = (0..5).map(|_| allocator.next_at("acme", now)).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_clock_regression_still_monotonic() {
        let allocator = VersionAllocator::new();
        let now = Utc::now();

        let first = allocator.next_at("acme", now);
        let second = allocator.next_at("acme", now - chrono::Duration::seconds(30));

        assert!(second > first);
    }

    #[test]
    fn test_seed_from_existing_versions() {
        let allocator = VersionAllocator::new();
        let future = VersionId::from_timestamp(Utc::now() + chrono::Duration::days(1));

        allocator.seed("acme", [&future]);
        assert!(allocator.is_seeded("acme"));

        let next = allocator.next("acme");
        assert!(next > future);
    }

    #[test]
    fn test_tenants_are_independent() {
        let allocator = VersionAllocator::new();
        let now = Utc::now();

        let a = allocator.next_at("a", now);
        let b = allocator.next_at("b", now);
        assert_eq!(a, b);
    }
}
