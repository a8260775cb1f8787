use std::fmt;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::event::{Interval, ResourceId};

/// Deterministic identifier of a reservation: SHA-256 over resource, start, end and purpose.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(resource: &str, interval: &Interval, purpose: &str) -> Self {
        let composite = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            resource.trim(),
            interval.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            interval.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            purpose.trim()
        );
        Self::hash(&composite)
    }

    /// Key for cancelling one concrete booking; distinct per booking even when
    /// several share the same reservation key.
    pub fn for_cancel(&self, uid: &str) -> Self {
        Self::hash(&format!("cancel\u{1f}{}\u{1f}{}", self.0, uid.trim()))
    }

    fn hash(composite: &str) -> Self {
        let digest = Sha256::digest(composite.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationIntent {
    pub resource: ResourceId,
    pub interval: Interval,
    pub purpose: String,
    pub key: IdempotencyKey,
}

impl ReservationIntent {
    pub fn new(resource: impl Into<ResourceId>, interval: Interval, purpose: impl Into<String>) -> Self {
        let resource = resource.into();
        let purpose = purpose.into();
        let key = IdempotencyKey::derive(&resource, &interval, &purpose);
        Self {
            resource,
            interval,
            purpose,
            key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn interval(h: u32) -> Interval {
        Interval::new(
            Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 2, h + 1, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn key_is_stable_across_calls() {
        let a = ReservationIntent::new("room-a", interval(9), "Cleaning");
        let b = ReservationIntent::new("room-a", interval(9), "Cleaning");
        assert_eq!(a.key, b.key);
        assert_eq!(a.key.as_str().len(), 64);
    }

    #[test]
    fn key_changes_with_each_defining_attribute() {
        let base = IdempotencyKey::derive("room-a", &interval(9), "Cleaning");
        assert_ne!(base, IdempotencyKey::derive("room-b", &interval(9), "Cleaning"));
        assert_ne!(base, IdempotencyKey::derive("room-a", &interval(10), "Cleaning"));
        assert_ne!(base, IdempotencyKey::derive("room-a", &interval(9), "Inspection"));
    }

    #[test]
    fn cancel_keys_differ_per_booking() {
        let key = IdempotencyKey::derive("room-a", &interval(9), "Cleaning");
        assert_ne!(key.for_cancel("bk-1"), key.for_cancel("bk-2"));
        assert_ne!(key.for_cancel("bk-1"), key);
        assert_eq!(key.for_cancel("bk-1"), key.for_cancel("bk-1"));
    }

    #[test]
    fn key_ignores_surrounding_whitespace() {
        assert_eq!(
            IdempotencyKey::derive("room-a ", &interval(9), " Cleaning"),
            IdempotencyKey::derive("room-a", &interval(9), "Cleaning")
        );
    }
}
