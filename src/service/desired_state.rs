use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use tracing::debug;

use crate::error::ConfigurationError;
use crate::models::event::{CalendarEvent, EventStatus, Interval, ResourceId};
use crate::models::reservation::ReservationIntent;
use crate::service::slot_policy::SlotPolicy;

pub struct DesiredStateGenerator<'a, P: SlotPolicy + ?Sized> {
    policy: &'a P,
    resources: Vec<ResourceId>,
    purpose: String,
    owner_marker: String,
}

impl<'a, P: SlotPolicy + ?Sized> DesiredStateGenerator<'a, P> {
    pub fn new(
        policy: &'a P,
        resources: Vec<ResourceId>,
        purpose: impl Into<String>,
        owner_marker: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            resources,
            purpose: purpose.into(),
            owner_marker: owner_marker.into(),
        }
    }

    /// Intents for every eligible slot overlapping `window`, ordered by start then resource.
    pub fn generate(
        &self,
        window: &Interval,
        observed: &[CalendarEvent],
    ) -> Result<Vec<ReservationIntent>, ConfigurationError> {
        self.policy.validate()?;
        if self.resources.is_empty() {
            return Err(ConfigurationError::NoResources);
        }
        let tz = self.policy.time_zone();
        let blocked = self.blocked_days(&tz, observed);

        let first_day = window.start.with_timezone(&tz).date_naive();
        let last_day = window.end.with_timezone(&tz).date_naive();

        let mut intents = Vec::new();
        let mut day = first_day;
        while day <= last_day {
            for slot in self.policy.candidate_slots(day) {
                if !slot.interval.overlaps(window) || !self.policy.is_eligible(&slot) {
                    continue;
                }
                for resource in &self.resources {
                    if blocked.contains(&(resource.clone(), day)) {
                        debug!(resource = %resource, day = %day, "day blocked by external all-day event");
                        continue;
                    }
                    intents.push(ReservationIntent::new(resource.clone(), slot.interval, self.purpose.clone()));
                }
            }
            let Some(next) = day.succ_opt() else { break };
            day = next;
        }

        intents.sort_by(|a, b| {
            (a.interval.start, &a.resource, a.interval.end).cmp(&(b.interval.start, &b.resource, b.interval.end))
        });
        intents.dedup_by(|a, b| a.key == b.key);
        Ok(intents)
    }

    // External all-day events (holidays, owner stays) fix the whole local day.
    fn blocked_days(&self, tz: &Tz, observed: &[CalendarEvent]) -> BTreeSet<(ResourceId, NaiveDate)> {
        let mut blocked = BTreeSet::new();
        for event in observed {
            if !event.all_day
                || event.status == EventStatus::Cancelled
                || event.is_owned_by(&self.owner_marker)
            {
                continue;
            }
            let mut day = event.interval.start.with_timezone(tz).date_naive();
            let end = (event.interval.end - Duration::seconds(1)).with_timezone(tz).date_naive();
            while day <= end {
                blocked.insert((event.resource.clone(), day));
                let Some(next) = day.succ_opt() else { break };
                day = next;
            }
        }
        blocked
    }
}
