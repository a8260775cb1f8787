use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ConfigurationError;
use crate::models::event::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkingWindow {
    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSlot {
    pub day: NaiveDate,
    pub interval: Interval,
}

/// Business rules deciding which slots should be reserved.
pub trait SlotPolicy: Send + Sync {
    fn time_zone(&self) -> Tz;

    fn candidate_slots(&self, day: NaiveDate) -> Vec<CandidateSlot>;

    fn is_eligible(&self, slot: &CandidateSlot) -> bool;

    fn validate(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }
}

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

pub fn resolve_local(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    // Ambiguous local times (DST fall-back) take the earlier instant; skipped ones yield None.
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Fixed-length slots laid back to back inside each day's working window.
#[derive(Debug, Clone)]
pub struct WorkingHoursPolicy {
    time_zone: Tz,
    windows: [Option<WorkingWindow>; 7],
    slot_length: Duration,
}

impl WorkingHoursPolicy {
    pub fn new(
        time_zone: Tz,
        windows: [Option<WorkingWindow>; 7],
        slot_length: Duration,
    ) -> Result<Self, ConfigurationError> {
        let policy = Self {
            time_zone,
            windows,
            slot_length,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn window_for(&self, day: NaiveDate) -> Option<&WorkingWindow> {
        self.windows[day.weekday().num_days_from_monday() as usize].as_ref()
    }

    pub fn slot_length(&self) -> Duration {
        self.slot_length
    }
}

impl SlotPolicy for WorkingHoursPolicy {
    fn time_zone(&self) -> Tz {
        self.time_zone
    }

    fn candidate_slots(&self, day: NaiveDate) -> Vec<CandidateSlot> {
        let Some(window) = self.window_for(day) else {
            return Vec::new();
        };
        let mut slots = Vec::new();
        let mut local_start = day.and_time(window.start);
        let window_end = day.and_time(window.end);
        while local_start + self.slot_length <= window_end {
            let local_end = local_start + self.slot_length;
            let start = resolve_local(&self.time_zone, local_start);
            let end = resolve_local(&self.time_zone, local_end);
            if let (Some(start), Some(end)) = (start, end) {
                if let Some(interval) = Interval::new(start, end) {
                    slots.push(CandidateSlot { day, interval });
                }
            }
            local_start = local_end;
        }
        slots
    }

    fn is_eligible(&self, slot: &CandidateSlot) -> bool {
        let Some(window) = self.window_for(slot.day) else {
            return false;
        };
        let local_start = slot.interval.start.with_timezone(&self.time_zone).naive_local();
        let local_end = slot.interval.end.with_timezone(&self.time_zone).naive_local();
        local_start >= slot.day.and_time(window.start) && local_end <= slot.day.and_time(window.end)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let mut longest: Option<Duration> = None;
        for (idx, window) in self.windows.iter().enumerate() {
            let Some(window) = window else { continue };
            if window.start >= window.end {
                let day = DAY_NAMES[idx].to_string();
                return Err(ConfigurationError::EmptyWorkingWindow {
                    day,
                    start: window.start.format("%H:%M").to_string(),
                    end: window.end.format("%H:%M").to_string(),
                });
            }
            longest = Some(longest.map_or(window.length(), |l| l.max(window.length())));
        }
        let Some(longest) = longest else {
            return Err(ConfigurationError::NoWorkingDays);
        };
        if self.slot_length <= Duration::zero() || self.slot_length > longest {
            return Err(ConfigurationError::InvalidSlotLength(self.slot_length.num_minutes()));
        }
        Ok(())
    }
}

/// Wraps another policy and rejects slots starting before `earliest`.
#[derive(Debug)]
pub struct LeadTimePolicy<'a, P: ?Sized> {
    inner: &'a P,
    earliest: DateTime<Utc>,
}

impl<'a, P: SlotPolicy + ?Sized> LeadTimePolicy<'a, P> {
    pub fn new(inner: &'a P, earliest: DateTime<Utc>) -> Self {
        Self { inner, earliest }
    }
}

impl<P: SlotPolicy + ?Sized> SlotPolicy for LeadTimePolicy<'_, P> {
    fn time_zone(&self) -> Tz {
        self.inner.time_zone()
    }

    fn candidate_slots(&self, day: NaiveDate) -> Vec<CandidateSlot> {
        self.inner.candidate_slots(day)
    }

    fn is_eligible(&self, slot: &CandidateSlot) -> bool {
        slot.interval.start >= self.earliest && self.inner.is_eligible(slot)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        self.inner.validate()
    }
}
