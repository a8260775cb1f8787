//! iCalendar (RFC 5545) reader for booking feeds.
//!
//! Line unfolding, content-line tokenizing and component nesting come from
//! `ical::IcalParser`; a feed it cannot read fails with
//! [`CalendarError::Malformed`]. On top of that this module resolves dates in
//! the feed's zone, keeps one VEVENT per UID and expands simple recurrences.
//! Turning VEVENTs into [`CalendarEvent`]s happens lazily in
//! [`CalendarFeed::events`]; events that lack usable dates are skipped with a
//! warning rather than failing the feed.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use ical::IcalParser;
use ical::parser::ical::component::IcalEvent;
use ical::property::Property;
use tracing::{debug, warn};

use crate::error::CalendarError;
use crate::models::event::{CalendarEvent, EventStatus, Interval, ResourceId};
use crate::service::recurrence::RecurrenceRule;
use crate::service::slot_policy::resolve_local;

const DEFAULT_SUMMARY: &str = "Imported guest";

/// How a feed maps onto this engine's resources and time zone.
#[derive(Debug, Clone)]
pub struct FeedContext {
    pub resource: ResourceId,
    pub time_zone: Tz,
    pub window: Option<Interval>,
}

impl FeedContext {
    pub fn new(resource: impl Into<ResourceId>, time_zone: Tz) -> Self {
        Self {
            resource: resource.into(),
            time_zone,
            window: None,
        }
    }

    pub fn with_window(mut self, window: Interval) -> Self {
        self.window = Some(window);
        self
    }
}

// A resolved DTSTART: the instant plus the wall-clock reading recurrences step from.
struct Start {
    at: DateTime<Utc>,
    local: NaiveDateTime,
    zone: Tz,
    all_day: bool,
}

pub struct CalendarFeed {
    events: Vec<IcalEvent>,
}

impl CalendarFeed {
    pub fn parse(text: &str) -> Result<Self, CalendarError> {
        let mut calendars = 0;
        let mut events = Vec::new();
        for calendar in IcalParser::new(text.as_bytes()) {
            let calendar = calendar.map_err(|e| CalendarError::malformed(e.to_string()))?;
            calendars += 1;
            events.extend(calendar.events);
        }
        if calendars == 0 {
            return Err(CalendarError::malformed("no VCALENDAR found"));
        }
        Ok(Self {
            events: dedup_by_uid(events),
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Lazily builds events; calling it again restarts from the first VEVENT.
    pub fn events<'a>(&'a self, ctx: &'a FeedContext) -> impl Iterator<Item = CalendarEvent> + 'a {
        self.events
            .iter()
            .flat_map(move |raw| self.expand(raw, ctx))
            .filter(move |event| match &ctx.window {
                Some(window) => event.interval.overlaps(window),
                None => true,
            })
    }

    fn expand(&self, raw: &IcalEvent, ctx: &FeedContext) -> Vec<CalendarEvent> {
        let Some((event, start)) = build_event(raw, ctx) else {
            return Vec::new();
        };
        // A RECURRENCE-ID marks a single moved instance, never a series.
        let Some(rule) = text(raw, "RRULE").filter(|_| find(raw, "RECURRENCE-ID").is_none()) else {
            return vec![event];
        };

        match RecurrenceRule::parse(&rule) {
            Ok(parsed) => {
                let excluded = self.excluded_starts(raw, &event.uid, ctx);
                parsed
                    .occurrences(start.local, start.zone, event.interval.duration(), ctx.window.as_ref())
                    .into_iter()
                    .filter(|interval| !excluded.contains(&interval.start))
                    .map(|interval| CalendarEvent {
                        interval,
                        ..event.clone()
                    })
                    .collect()
            }
            Err(reason) => {
                warn!(
                    uid = %event.uid,
                    rule = %rule,
                    reason = %reason,
                    "recurrence not expanded, holding the rest of the window"
                );
                let end = match &ctx.window {
                    Some(window) => window.end.max(event.interval.end),
                    None => event.interval.end,
                };
                let interval = Interval {
                    start: event.interval.start,
                    end,
                };
                vec![CalendarEvent { interval, ..event }]
            }
        }
    }

    // EXDATE values plus the original starts of instances moved by RECURRENCE-ID overrides.
    fn excluded_starts(&self, master: &IcalEvent, uid: &str, ctx: &FeedContext) -> BTreeSet<DateTime<Utc>> {
        let mut excluded = BTreeSet::new();
        for prop in master.properties.iter().filter(|p| is(p, "EXDATE")) {
            for value in raw_value(prop).split(',') {
                if let Some(start) = parse_instant(prop, value, &ctx.time_zone) {
                    excluded.insert(start.at);
                }
            }
        }
        for other in self.events.iter().filter(|e| text(e, "UID").as_deref() == Some(uid)) {
            if let Some(prop) = find(other, "RECURRENCE-ID") {
                if let Some(start) = parse_instant(prop, raw_value(prop), &ctx.time_zone) {
                    excluded.insert(start.at);
                }
            }
        }
        excluded
    }
}

/// Parses `text` and collects the events that fall inside the context window.
pub fn parse_events(text: &str, ctx: &FeedContext) -> Result<Vec<CalendarEvent>, CalendarError> {
    let feed = CalendarFeed::parse(text)?;
    Ok(feed.events(ctx).collect())
}

fn is(prop: &Property, name: &str) -> bool {
    prop.name.eq_ignore_ascii_case(name)
}

fn find<'a>(event: &'a IcalEvent, name: &str) -> Option<&'a Property> {
    event.properties.iter().find(|p| is(p, name))
}

fn raw_value(prop: &Property) -> &str {
    prop.value.as_deref().unwrap_or_default().trim()
}

fn text(event: &IcalEvent, name: &str) -> Option<String> {
    find(event, name)
        .map(|p| unescape(raw_value(p)))
        .filter(|v| !v.trim().is_empty())
}

fn param<'a>(prop: &'a Property, name: &str) -> Option<&'a str> {
    prop.params
        .as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(|v| v.trim().trim_matches('"'))
}

fn sequence(event: &IcalEvent) -> Option<u32> {
    find(event, "SEQUENCE").and_then(|p| raw_value(p).parse().ok())
}

fn uid_for_log(event: &IcalEvent) -> String {
    text(event, "UID").unwrap_or_else(|| "-".to_string())
}

// Keeps one VEVENT per (UID, RECURRENCE-ID): highest SEQUENCE wins, the first one on a tie.
fn dedup_by_uid(events: Vec<IcalEvent>) -> Vec<IcalEvent> {
    let mut winner_by_uid: HashMap<(String, String), usize> = HashMap::new();
    let mut kept: Vec<Option<IcalEvent>> = Vec::with_capacity(events.len());
    for event in events {
        let Some(uid) = text(&event, "UID") else {
            kept.push(Some(event));
            continue;
        };
        let instance = find(&event, "RECURRENCE-ID").map(raw_value).unwrap_or_default().to_string();
        match winner_by_uid.get(&(uid.clone(), instance.clone())).copied() {
            Some(idx) => {
                let previous = kept[idx].as_ref().and_then(sequence).unwrap_or(0);
                warn!(uid = %uid, "duplicate UID in feed");
                if sequence(&event).unwrap_or(0) > previous {
                    kept[idx] = Some(event);
                }
            }
            None => {
                winner_by_uid.insert((uid, instance), kept.len());
                kept.push(Some(event));
            }
        }
    }
    kept.into_iter().flatten().collect()
}

fn build_event(raw: &IcalEvent, ctx: &FeedContext) -> Option<(CalendarEvent, Start)> {
    let Some(start_prop) = find(raw, "DTSTART") else {
        warn!(uid = %uid_for_log(raw), "skipping VEVENT without DTSTART");
        return None;
    };
    let Some(start) = parse_instant(start_prop, raw_value(start_prop), &ctx.time_zone) else {
        warn!(uid = %uid_for_log(raw), value = %raw_value(start_prop), "skipping VEVENT with unreadable DTSTART");
        return None;
    };

    let end = if let Some(end_prop) = find(raw, "DTEND") {
        parse_instant(end_prop, raw_value(end_prop), &ctx.time_zone).map(|end| end.at)
    } else if let Some(duration) = find(raw, "DURATION") {
        parse_duration(raw_value(duration)).and_then(|d| start.at.checked_add_signed(d))
    } else if start.all_day {
        start.at.checked_add_signed(Duration::days(1))
    } else {
        Some(start.at)
    };
    let Some(end) = end else {
        warn!(uid = %uid_for_log(raw), "skipping VEVENT with unreadable end");
        return None;
    };
    let Some(interval) = Interval::new(start.at, end) else {
        warn!(
            uid = %uid_for_log(raw),
            start = %start.at,
            end = %end,
            "skipping VEVENT that does not end after it starts"
        );
        return None;
    };

    let summary = text(raw, "SUMMARY").unwrap_or(DEFAULT_SUMMARY.to_string());
    // Feeds without UIDs still need a stable identity.
    let uid = text(raw, "UID").unwrap_or_else(|| format!("{}-{}", summary, raw_value(start_prop)));

    let status = match text(raw, "STATUS") {
        Some(value) => EventStatus::from_ical(&value).unwrap_or_else(|| {
            debug!(uid = %uid, status = %value, "unknown STATUS treated as confirmed");
            EventStatus::Confirmed
        }),
        None => EventStatus::Confirmed,
    };

    let categories = raw
        .properties
        .iter()
        .filter(|p| is(p, "CATEGORIES"))
        .flat_map(|p| split_unescaped(raw_value(p)))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let event = CalendarEvent {
        uid,
        resource: ctx.resource.clone(),
        interval,
        status,
        revision: sequence(raw),
        summary,
        description: text(raw, "DESCRIPTION"),
        categories,
        all_day: start.all_day,
    };
    Some((event, start))
}

fn parse_instant(prop: &Property, value: &str, default_tz: &Tz) -> Option<Start> {
    let value = value.trim();
    let all_day = param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE")) || value.len() == 8;
    let zone = match param(prop, "TZID") {
        Some(tzid) => tzid.parse::<Tz>().unwrap_or_else(|_| {
            debug!(tzid = %tzid, "unknown TZID, using configured zone");
            *default_tz
        }),
        None => *default_tz,
    };

    if all_day {
        let local = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?.and_hms_opt(0, 0, 0)?;
        let at = resolve_local(&zone, local)?;
        return Some(Start {
            at,
            local,
            zone,
            all_day,
        });
    }
    if let Some(utc) = value.strip_suffix('Z') {
        let local = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(Start {
            at: local.and_utc(),
            local,
            zone: chrono_tz::UTC,
            all_day,
        });
    }
    let local = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    let at = resolve_local(&zone, local)?;
    Some(Start {
        at,
        local,
        zone,
        all_day,
    })
}

/// ISO 8601 / RFC 5545 duration such as `P1D`, `PT1H30M` or `P2W`.
/// Values too large for a `Duration` yield `None`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let rest = rest.strip_prefix('P')?;
    let mut total = Duration::zero();
    let mut number = String::new();
    let mut in_time = false;
    let mut any = false;
    for ch in rest.chars() {
        match ch {
            'T' => in_time = true,
            '0'..='9' => number.push(ch),
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                any = true;
                let part = match (unit, in_time) {
                    ('W', false) => Duration::try_weeks(n),
                    ('D', false) => Duration::try_days(n),
                    ('H', true) => Duration::try_hours(n),
                    ('M', true) => Duration::try_minutes(n),
                    ('S', true) => Duration::try_seconds(n),
                    _ => return None,
                }?;
                total = total.checked_add(&part)?;
            }
        }
    }
    if !any || !number.is_empty() {
        return None;
    }
    Some(if negative { -total } else { total })
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn split_unescaped(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push('\\');
                    current.push(next);
                }
            }
            ',' => parts.push(unescape(&std::mem::take(&mut current))),
            _ => current.push(ch),
        }
    }
    parts.push(unescape(&current));
    parts
}
