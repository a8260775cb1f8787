use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::reservation::IdempotencyKey;

pub type ResourceId = String;

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    // Back-to-back intervals (a.end == b.start) do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn from_ical(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CONFIRMED" => Some(EventStatus::Confirmed),
            "TENTATIVE" => Some(EventStatus::Tentative),
            "CANCELLED" | "CANCELED" => Some(EventStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub uid: String,
    pub resource: ResourceId,
    pub interval: Interval,
    pub status: EventStatus,
    pub revision: Option<u32>,
    pub summary: String,
    pub description: Option<String>,
    pub categories: Vec<String>,
    pub all_day: bool,
}

impl CalendarEvent {
    /// True when the event carries the marker this engine stamps on its own bookings.
    pub fn is_owned_by(&self, marker: &str) -> bool {
        if marker.is_empty() {
            return false;
        }
        self.categories.iter().any(|c| c == marker)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.contains(marker))
    }

    pub fn occupies(&self, tentative_occupies: bool) -> bool {
        match self.status {
            EventStatus::Confirmed => true,
            EventStatus::Tentative => tentative_occupies,
            EventStatus::Cancelled => false,
        }
    }

    /// Key derived the same way as for a reservation intent, using the summary as purpose.
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::derive(&self.resource, &self.interval, &self.summary)
    }
}
