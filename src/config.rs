use std::collections::HashMap;
use std::env;
use std::fs;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveTime, Weekday};
use chrono_tz::Tz;

use crate::error::ConfigurationError;
use crate::models::event::ResourceId;
use crate::service::executor::RetryPolicy;
use crate::service::slot_policy::{WorkingHoursPolicy, WorkingWindow};

#[derive(Debug, Default, Clone)]
pub struct AppConfig {
    values: HashMap<String, String>,
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let mut values = HashMap::new();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(format!("Invalid config line {}: {}", idx + 1, line));
            };
            let key = key.trim();
            let mut value = value.trim().to_string();
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = value[1..value.len() - 1].to_string();
            }
            values.insert(key.to_string(), value);
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    /// File value first, then the process environment.
    pub fn get_or_env(&self, key: &str) -> Option<String> {
        self.get(key).or_else(|| env::var(key).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFeed {
    pub resource: ResourceId,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub url: Option<String>,
    pub token: Option<String>,
    pub idempotent: bool,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub time_zone: Tz,
    pub policy: WorkingHoursPolicy,
    pub horizon: Duration,
    pub lead_time: Duration,
    pub purpose: String,
    pub feeds: Vec<ResourceFeed>,
    pub owner_marker: String,
    pub tentative_occupies: bool,
    pub retry: RetryPolicy,
    pub http_timeout: StdDuration,
    pub provider: ProviderSettings,
    pub sync_interval: StdDuration,
}

const DEFAULT_TIME_ZONE: &str = "UTC";
const DEFAULT_WORKING_DAYS: &str = "Mon,Tue,Wed,Thu,Fri";
const DEFAULT_WORKING_HOURS: &str = "09:00-17:00";
const DEFAULT_PURPOSE: &str = "Reserved";
pub const DEFAULT_OWNER_MARKER: &str = "X-BOOKING-SYNC";
pub const MAX_HORIZON_DAYS: i64 = 3650;

impl SyncSettings {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| config.get_or_env(key))
    }

    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tz_name = get("TIME_ZONE").unwrap_or(DEFAULT_TIME_ZONE.to_string());
        let time_zone: Tz = tz_name
            .trim()
            .parse()
            .map_err(|_| ConfigurationError::InvalidTimeZone(tz_name.clone()))?;

        let days = parse_weekdays(&get("WORKING_DAYS").unwrap_or(DEFAULT_WORKING_DAYS.to_string()))?;
        let default_hours = get("WORKING_HOURS").unwrap_or(DEFAULT_WORKING_HOURS.to_string());
        let mut windows: [Option<WorkingWindow>; 7] = [None; 7];
        for day in days {
            let key = format!("WORKING_HOURS_{}", day_key(day));
            let raw = get(&key).unwrap_or_else(|| default_hours.clone());
            windows[day.num_days_from_monday() as usize] = Some(parse_window(&raw)?);
        }

        let slot_minutes = parse_number(&get, "SLOT_MINUTES", 60)?;
        let slot_length =
            Duration::try_minutes(slot_minutes).ok_or(ConfigurationError::InvalidSlotLength(slot_minutes))?;
        let policy = WorkingHoursPolicy::new(time_zone, windows, slot_length)?;

        let horizon_days = parse_number(&get, "HORIZON_DAYS", 14)?;
        let horizon = Some(horizon_days)
            .filter(|days| (1..=MAX_HORIZON_DAYS).contains(days))
            .and_then(Duration::try_days)
            .ok_or(ConfigurationError::InvalidHorizon(horizon_days))?;

        let lead_minutes = parse_number(&get, "LEAD_TIME_MINUTES", 0)?;
        let lead_time = Some(lead_minutes)
            .filter(|minutes| *minutes >= 0)
            .and_then(Duration::try_minutes)
            .ok_or_else(|| ConfigurationError::invalid("LEAD_TIME_MINUTES", &lead_minutes.to_string()))?;

        let feeds = parse_feeds(
            &get("RESOURCE_FEEDS").ok_or_else(|| ConfigurationError::MissingValue("RESOURCE_FEEDS".to_string()))?,
        )?;

        let owner_marker = get("OWNER_MARKER").unwrap_or(DEFAULT_OWNER_MARKER.to_string());
        if owner_marker.trim().is_empty() {
            return Err(ConfigurationError::invalid("OWNER_MARKER", &owner_marker));
        }

        let attempts = parse_number(&get, "RETRY_MAX_ATTEMPTS", 3)?;
        let max_attempts = u32::try_from(attempts)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| ConfigurationError::invalid("RETRY_MAX_ATTEMPTS", &attempts.to_string()))?;
        let retry = RetryPolicy {
            max_attempts,
            backoff_base: StdDuration::from_millis(parse_number(&get, "RETRY_BACKOFF_MS", 500)?.max(0) as u64),
            max_backoff: StdDuration::from_millis(
                parse_number(&get, "RETRY_MAX_BACKOFF_MS", 30_000)?.max(0) as u64,
            ),
        };

        Ok(Self {
            time_zone,
            policy,
            horizon,
            lead_time,
            purpose: get("RESERVATION_PURPOSE")
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(DEFAULT_PURPOSE.to_string()),
            feeds,
            owner_marker: owner_marker.trim().to_string(),
            tentative_occupies: parse_bool(&get, "TENTATIVE_OCCUPIES", true)?,
            retry,
            http_timeout: StdDuration::from_secs(parse_number(&get, "HTTP_TIMEOUT_SECS", 10)?.max(1) as u64),
            provider: ProviderSettings {
                url: get("PROVIDER_URL").filter(|u| !u.trim().is_empty()),
                token: get("PROVIDER_TOKEN").filter(|t| !t.trim().is_empty()),
                idempotent: parse_bool(&get, "PROVIDER_IDEMPOTENT", false)?,
            },
            sync_interval: StdDuration::from_secs(parse_number(&get, "SYNC_INTERVAL_SECS", 900)?.max(1) as u64),
        })
    }
}

fn parse_number<F>(get: &F, key: &str, default: i64) -> Result<i64, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigurationError::invalid(key, &raw)),
        None => Ok(default),
    }
}

fn parse_bool<F>(get: &F, key: &str, default: bool) -> Result<bool, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigurationError::invalid(key, &raw)),
        },
        None => Ok(default),
    }
}

fn day_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MON",
        Weekday::Tue => "TUE",
        Weekday::Wed => "WED",
        Weekday::Thu => "THU",
        Weekday::Fri => "FRI",
        Weekday::Sat => "SAT",
        Weekday::Sun => "SUN",
    }
}

fn parse_weekdays(raw: &str) -> Result<Vec<Weekday>, ConfigurationError> {
    let mut days = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let day: Weekday = part
            .parse()
            .map_err(|_| ConfigurationError::invalid("WORKING_DAYS", part))?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(ConfigurationError::NoWorkingDays);
    }
    Ok(days)
}

pub fn parse_window(raw: &str) -> Result<WorkingWindow, ConfigurationError> {
    let invalid = || ConfigurationError::InvalidWorkingHours(raw.to_string());
    let (start, end) = raw.split_once('-').ok_or_else(invalid)?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").map_err(|_| invalid())?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").map_err(|_| invalid())?;
    Ok(WorkingWindow { start, end })
}

fn parse_feeds(raw: &str) -> Result<Vec<ResourceFeed>, ConfigurationError> {
    let mut feeds: Vec<ResourceFeed> = Vec::new();
    for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((resource, url)) = part.split_once('=') else {
            return Err(ConfigurationError::invalid("RESOURCE_FEEDS", part));
        };
        let (resource, url) = (resource.trim(), url.trim());
        if resource.is_empty() || url.is_empty() {
            return Err(ConfigurationError::invalid("RESOURCE_FEEDS", part));
        }
        if feeds.iter().any(|f| f.resource == resource) {
            return Err(ConfigurationError::invalid("RESOURCE_FEEDS", resource));
        }
        feeds.push(ResourceFeed {
            resource: resource.to_string(),
            url: url.to_string(),
        });
    }
    if feeds.is_empty() {
        return Err(ConfigurationError::NoResources);
    }
    Ok(feeds)
}
