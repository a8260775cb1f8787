//! Expansion of simple RRULEs (`FREQ=DAILY` / `FREQ=WEEKLY` with `INTERVAL`,
//! `COUNT` and `UNTIL`). Anything richer is reported as unsupported so the
//! caller can fall back to treating the series as a block.

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

use crate::models::event::Interval;
use crate::service::slot_policy::resolve_local;

const MAX_OCCURRENCES: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Until {
    Instant(DateTime<Utc>),
    Local(NaiveDateTime),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<Until>,
}

impl RecurrenceRule {
    pub fn parse(value: &str) -> Result<Self, String> {
        let mut frequency = None;
        let mut interval = 1;
        let mut count = None;
        let mut until = None;
        for part in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, raw) = part
                .split_once('=')
                .ok_or_else(|| format!("bad rule part '{part}'"))?;
            match name.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    frequency = Some(match raw.trim().to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        other => return Err(format!("unsupported frequency {other}")),
                    })
                }
                "INTERVAL" => {
                    interval = raw
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| format!("bad INTERVAL '{raw}'"))?
                }
                "COUNT" => count = Some(raw.trim().parse::<u32>().map_err(|_| format!("bad COUNT '{raw}'"))?),
                "UNTIL" => until = Some(parse_until(raw.trim()).ok_or_else(|| format!("bad UNTIL '{raw}'"))?),
                "WKST" => {}
                other => return Err(format!("unsupported rule part {other}")),
            }
        }
        Ok(Self {
            frequency: frequency.ok_or("rule without FREQ")?,
            interval,
            count,
            until,
        })
    }

    fn step_days(&self) -> u64 {
        let unit = match self.frequency {
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
        };
        unit * u64::from(self.interval)
    }

    /// Occurrence intervals, starting with the first instance, that may overlap `window`.
    pub fn occurrences(
        &self,
        local_start: NaiveDateTime,
        zone: Tz,
        length: Duration,
        window: Option<&Interval>,
    ) -> Vec<Interval> {
        let step = self.step_days();
        let first_n = match (window, resolve_local(&zone, local_start)) {
            (Some(window), Some(first)) => (window.start - first)
                .checked_sub(&length)
                .map(|lag| lag.num_days())
                .filter(|days| *days > 0)
                .map_or(0, |days| days as u64 / step),
            _ => 0,
        };

        let mut intervals = Vec::new();
        for n in first_n..first_n.saturating_add(MAX_OCCURRENCES) {
            if self.count.is_some_and(|count| n >= u64::from(count)) {
                break;
            }
            let Some(local) = n
                .checked_mul(step)
                .and_then(|days| local_start.checked_add_days(Days::new(days)))
            else {
                break;
            };
            if matches!(self.until, Some(Until::Local(until)) if local > until) {
                break;
            }
            // Local times skipped by a DST jump have no instance.
            let Some(start) = resolve_local(&zone, local) else {
                continue;
            };
            if matches!(self.until, Some(Until::Instant(until)) if start > until) {
                break;
            }
            if window.is_some_and(|w| start >= w.end) {
                break;
            }
            let Some(end) = start.checked_add_signed(length) else {
                break;
            };
            if let Some(interval) = Interval::new(start, end) {
                intervals.push(interval);
            }
        }
        intervals
    }
}

fn parse_until(value: &str) -> Option<Until> {
    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(Until::Instant(naive.and_utc()));
    }
    if value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return date.and_hms_opt(23, 59, 59).map(Until::Local);
    }
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .ok()
        .map(Until::Local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn parses_supported_rules() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY;INTERVAL=2;COUNT=4").unwrap();
        assert_eq!(rule.frequency, Frequency::Weekly);
        assert_eq!(rule.interval, 2);
        assert_eq!(rule.count, Some(4));
        assert!(RecurrenceRule::parse("FREQ=MONTHLY").is_err());
        assert!(RecurrenceRule::parse("FREQ=WEEKLY;BYDAY=MO,WE").is_err());
        assert!(RecurrenceRule::parse("INTERVAL=2").is_err());
        assert!(RecurrenceRule::parse("FREQ=DAILY;INTERVAL=0").is_err());
    }

    #[test]
    fn count_limits_daily_series() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;COUNT=3").unwrap();
        let got = rule.occurrences(local(2, 9), chrono_tz::UTC, Duration::hours(1), None);
        assert_eq!(got.len(), 3);
        assert_eq!(got[2].start, Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap());
    }

    #[test]
    fn until_is_inclusive() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY;UNTIL=20260316T090000Z").unwrap();
        let got = rule.occurrences(local(2, 9), chrono_tz::UTC, Duration::hours(1), None);
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn open_series_is_bounded_by_the_window() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY").unwrap();
        let start = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        let window = Interval::new(start, start + Duration::days(14)).unwrap();
        let got = rule.occurrences(local(2, 9), chrono_tz::UTC, Duration::hours(1), Some(&window));
        let inside: Vec<_> = got.iter().filter(|i| i.overlaps(&window)).collect();
        assert_eq!(inside.len(), 2);
        assert!(got.len() < 5);
    }

    #[test]
    fn weekly_series_keeps_local_time_across_dst() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY;COUNT=2").unwrap();
        // Lisbon moves to summer time on 2026-03-29.
        let got = rule.occurrences(local(23, 9), chrono_tz::Europe::Lisbon, Duration::hours(1), None);
        assert_eq!(got[0].start, Utc.with_ymd_and_hms(2026, 3, 23, 9, 0, 0).unwrap());
        assert_eq!(got[1].start, Utc.with_ymd_and_hms(2026, 3, 30, 8, 0, 0).unwrap());
    }
}
