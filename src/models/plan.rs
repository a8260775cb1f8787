use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::event::{CalendarEvent, Interval, ResourceId};
use crate::models::reservation::{IdempotencyKey, ReservationIntent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Cancel,
    Skip,
}

/// Reference to a booking seen in the observed feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub uid: String,
    pub resource: ResourceId,
    pub interval: Interval,
    pub summary: String,
}

impl From<&CalendarEvent> for EventRef {
    fn from(event: &CalendarEvent) -> Self {
        Self {
            uid: event.uid.clone(),
            resource: event.resource.clone(),
            interval: event.interval,
            summary: event.summary.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationTarget {
    Intent(ReservationIntent),
    Event(EventRef),
}

impl OperationTarget {
    pub fn resource(&self) -> &str {
        match self {
            OperationTarget::Intent(intent) => &intent.resource,
            OperationTarget::Event(event) => &event.resource,
        }
    }

    pub fn interval(&self) -> &Interval {
        match self {
            OperationTarget::Intent(intent) => &intent.interval,
            OperationTarget::Event(event) => &event.interval,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Reason {
    NotBooked,
    AlreadySatisfied,
    AwaitingConfirmation,
    ExternallyOccupied { uid: String },
    Superseded { by: IdempotencyKey },
    DuplicateIntent,
    NoLongerDesired,
    DuplicateBooking { kept: String },
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::NotBooked => write!(f, "not booked"),
            Reason::AlreadySatisfied => write!(f, "already satisfied"),
            Reason::AwaitingConfirmation => write!(f, "awaiting confirmation"),
            Reason::ExternallyOccupied { .. } => write!(f, "externally occupied"),
            Reason::Superseded { .. } => write!(f, "superseded"),
            Reason::DuplicateIntent => write!(f, "duplicate intent"),
            Reason::NoLongerDesired => write!(f, "no longer desired"),
            Reason::DuplicateBooking { .. } => write!(f, "duplicate booking"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub key: IdempotencyKey,
    pub target: OperationTarget,
    pub reason: Reason,
}

impl Operation {
    pub fn create(intent: &ReservationIntent) -> Self {
        Self {
            kind: OperationKind::Create,
            key: intent.key.clone(),
            target: OperationTarget::Intent(intent.clone()),
            reason: Reason::NotBooked,
        }
    }

    pub fn skip(intent: &ReservationIntent, reason: Reason) -> Self {
        Self {
            kind: OperationKind::Skip,
            key: intent.key.clone(),
            target: OperationTarget::Intent(intent.clone()),
            reason,
        }
    }

    /// Cancels are keyed by the booking they remove, not by the reservation it holds.
    pub fn cancel(event: &CalendarEvent, reason: Reason) -> Self {
        Self {
            kind: OperationKind::Cancel,
            key: event.idempotency_key().for_cancel(&event.uid),
            target: OperationTarget::Event(EventRef::from(event)),
            reason,
        }
    }

    pub fn is_skip(&self) -> bool {
        self.kind == OperationKind::Skip
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let interval = self.target.interval();
        write!(
            f,
            "{:?}({}, {} - {}) [{}]",
            self.kind,
            self.target.resource(),
            interval.start.format("%Y-%m-%d %H:%M"),
            interval.end.format("%Y-%m-%d %H:%M"),
            self.reason
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub operations: Vec<Operation>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// True when applying the plan would not change anything.
    pub fn is_noop(&self) -> bool {
        self.operations.iter().all(Operation::is_skip)
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|op| op.kind == kind).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }
}
