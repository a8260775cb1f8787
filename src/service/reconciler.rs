//! Diffs desired reservations against the observed calendar.
//!
//! The plan is a pure function of its inputs: no clock reads, no randomness
//! and no iteration over hash-ordered collections, so identical inputs always
//! produce an identical plan.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::event::{CalendarEvent, EventStatus, Interval};
use crate::models::plan::{Operation, OperationKind, Plan, Reason};
use crate::models::reservation::{IdempotencyKey, ReservationIntent};

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub owner_marker: String,
    pub tentative_occupies: bool,
    /// Owned bookings starting before this instant are neither cancelled nor replaced.
    pub lead_cutoff: Option<DateTime<Utc>>,
}

impl ReconcileOptions {
    pub fn new(owner_marker: impl Into<String>) -> Self {
        Self {
            owner_marker: owner_marker.into(),
            tentative_occupies: true,
            lead_cutoff: None,
        }
    }

    fn is_locked(&self, event: &CalendarEvent) -> bool {
        self.lead_cutoff.is_some_and(|cutoff| event.interval.start < cutoff)
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    options: ReconcileOptions,
}

struct Claim<'k> {
    interval: Interval,
    key: &'k IdempotencyKey,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    /// `intents` must be in generation order; earlier intents win conflicts.
    pub fn plan(&self, intents: &[ReservationIntent], observed: &[CalendarEvent]) -> Plan {
        let marker = self.options.owner_marker.as_str();

        let mut observed: Vec<&CalendarEvent> = observed.iter().collect();
        observed.sort_by(|a, b| {
            (&a.resource, a.interval.start, a.interval.end, &a.uid)
                .cmp(&(&b.resource, b.interval.start, b.interval.end, &b.uid))
        });

        let mut owned_by_key: BTreeMap<IdempotencyKey, Vec<&CalendarEvent>> = BTreeMap::new();
        let mut occupying: BTreeMap<&str, Vec<&CalendarEvent>> = BTreeMap::new();
        for &event in &observed {
            if event.status == EventStatus::Cancelled {
                continue;
            }
            if event.is_owned_by(marker) {
                owned_by_key.entry(event.idempotency_key()).or_default().push(event);
            }
            if event.occupies(self.options.tentative_occupies) {
                occupying.entry(event.resource.as_str()).or_default().push(event);
            }
        }

        let mut intent_ops: Vec<Operation> = Vec::with_capacity(intents.len());
        let mut seen: BTreeSet<&IdempotencyKey> = BTreeSet::new();
        let mut winners: BTreeSet<&IdempotencyKey> = BTreeSet::new();
        let mut superseded_by: BTreeMap<&IdempotencyKey, &IdempotencyKey> = BTreeMap::new();
        let mut claimed: BTreeMap<&str, Vec<Claim<'_>>> = BTreeMap::new();

        for intent in intents {
            if !seen.insert(&intent.key) {
                intent_ops.push(Operation::skip(intent, Reason::DuplicateIntent));
                continue;
            }

            let earlier = claimed
                .get(intent.resource.as_str())
                .and_then(|claims| claims.iter().find(|c| c.interval.overlaps(&intent.interval)));
            if let Some(winner) = earlier {
                debug!(key = intent.key.short(), by = winner.key.short(), "intent superseded");
                superseded_by.insert(&intent.key, winner.key);
                intent_ops.push(Operation::skip(intent, Reason::Superseded { by: winner.key.clone() }));
                continue;
            }

            if let Some(existing) = owned_by_key.get(&intent.key) {
                let reason = if existing.iter().any(|e| e.status == EventStatus::Confirmed) {
                    Reason::AlreadySatisfied
                } else {
                    Reason::AwaitingConfirmation
                };
                intent_ops.push(Operation::skip(intent, reason));
                winners.insert(&intent.key);
                claim(&mut claimed, intent);
                continue;
            }

            // Owned overlaps are either stale or belong to a later intent; both get cancelled below.
            // Locked owned bookings stay, so they block like external ones.
            let external = occupying.get(intent.resource.as_str()).and_then(|events| {
                events.iter().find(|e| {
                    e.interval.overlaps(&intent.interval)
                        && (!e.is_owned_by(marker) || self.options.is_locked(e))
                })
            });
            if let Some(external) = external {
                intent_ops.push(Operation::skip(
                    intent,
                    Reason::ExternallyOccupied {
                        uid: external.uid.clone(),
                    },
                ));
                continue;
            }

            intent_ops.push(Operation::create(intent));
            winners.insert(&intent.key);
            claim(&mut claimed, intent);
        }

        let mut cancels: Vec<Operation> = Vec::new();
        for &event in &observed {
            if event.status == EventStatus::Cancelled || !event.is_owned_by(marker) {
                continue;
            }
            if self.options.is_locked(event) {
                debug!(uid = %event.uid, "owned booking inside lead time left alone");
                continue;
            }
            let key = event.idempotency_key();
            if !winners.contains(&key) {
                let reason = match superseded_by.get(&key) {
                    Some(by) => Reason::Superseded { by: (*by).clone() },
                    None => Reason::NoLongerDesired,
                };
                cancels.push(Operation::cancel(event, reason));
                continue;
            }
            if let Some(kept) = owned_by_key.get(&key).and_then(|events| keeper(events)) {
                if kept.uid != event.uid {
                    cancels.push(Operation::cancel(
                        event,
                        Reason::DuplicateBooking {
                            kept: kept.uid.clone(),
                        },
                    ));
                }
            }
        }

        let plan = order_operations(intent_ops, cancels);
        info!(
            create = plan.count(OperationKind::Create),
            cancel = plan.count(OperationKind::Cancel),
            skip = plan.count(OperationKind::Skip),
            "reconciliation plan computed"
        );
        plan
    }
}

fn claim<'k>(claimed: &mut BTreeMap<&'k str, Vec<Claim<'k>>>, intent: &'k ReservationIntent) {
    claimed.entry(intent.resource.as_str()).or_default().push(Claim {
        interval: intent.interval,
        key: &intent.key,
    });
}

// A confirmed booking is kept in preference to a tentative one.
fn keeper<'e>(events: &[&'e CalendarEvent]) -> Option<&'e CalendarEvent> {
    events
        .iter()
        .find(|e| e.status == EventStatus::Confirmed)
        .or_else(|| events.first())
        .copied()
}

// Cancels that free a slot are emitted right before the Create that needs it.
fn order_operations(intent_ops: Vec<Operation>, cancels: Vec<Operation>) -> Plan {
    let mut emitted = vec![false; cancels.len()];
    let mut operations = Vec::with_capacity(intent_ops.len() + cancels.len());
    for op in intent_ops {
        if op.kind == OperationKind::Create {
            for (idx, cancel) in cancels.iter().enumerate() {
                if !emitted[idx]
                    && cancel.target.resource() == op.target.resource()
                    && cancel.target.interval().overlaps(op.target.interval())
                {
                    operations.push(cancel.clone());
                    emitted[idx] = true;
                }
            }
        }
        operations.push(op);
    }
    for (idx, cancel) in cancels.into_iter().enumerate() {
        if !emitted[idx] {
            operations.push(cancel);
        }
    }
    Plan { operations }
}
