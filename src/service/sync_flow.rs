use chrono::{DateTime, Utc};
use tracing::info;

use crate::clients::calendar_client::CalendarSource;
use crate::config::SyncSettings;
use crate::error::{ConfigurationError, SyncError};
use crate::models::event::{CalendarEvent, Interval};
use crate::models::plan::Plan;
use crate::models::report::RunReport;
use crate::service::desired_state::DesiredStateGenerator;
use crate::service::executor::{BookingExecutor, BookingProvider};
use crate::service::ical_parser::{FeedContext, parse_events};
use crate::service::reconciler::{ReconcileOptions, Reconciler};
use crate::service::slot_policy::LeadTimePolicy;

pub fn look_ahead(settings: &SyncSettings, now: DateTime<Utc>) -> Result<Interval, ConfigurationError> {
    now.checked_add_signed(settings.horizon)
        .and_then(|end| Interval::new(now, end))
        .ok_or(ConfigurationError::InvalidHorizon(settings.horizon.num_days()))
}

/// Earliest start a booking may be created, cancelled or replaced at.
pub fn lead_cutoff(settings: &SyncSettings, now: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigurationError> {
    now.checked_add_signed(settings.lead_time).ok_or_else(|| {
        ConfigurationError::invalid("LEAD_TIME_MINUTES", &settings.lead_time.num_minutes().to_string())
    })
}

/// Fetches and parses every feed. Any failing feed aborts the whole run.
pub async fn observe<S: CalendarSource + ?Sized>(
    settings: &SyncSettings,
    source: &S,
    window: &Interval,
) -> Result<Vec<CalendarEvent>, SyncError> {
    let mut observed = Vec::new();
    for feed in &settings.feeds {
        let text = source.fetch(feed).await?;
        let ctx = FeedContext::new(feed.resource.clone(), settings.time_zone).with_window(*window);
        let events = parse_events(&text, &ctx)?;
        info!(resource = %feed.resource, events = events.len(), "calendar parsed");
        observed.extend(events);
    }
    Ok(observed)
}

/// `window.start` is the run's `now`; the lead time counts from there.
pub fn compute_plan(
    settings: &SyncSettings,
    window: &Interval,
    observed: &[CalendarEvent],
) -> Result<Plan, SyncError> {
    let cutoff = lead_cutoff(settings, window.start)?;
    let policy = LeadTimePolicy::new(&settings.policy, cutoff);
    let resources = settings.feeds.iter().map(|f| f.resource.clone()).collect();
    let generator = DesiredStateGenerator::new(
        &policy,
        resources,
        settings.purpose.clone(),
        settings.owner_marker.clone(),
    );
    let intents = generator.generate(window, observed)?;
    info!(intents = intents.len(), observed = observed.len(), "desired state generated");

    let mut options = ReconcileOptions::new(settings.owner_marker.clone());
    options.tentative_occupies = settings.tentative_occupies;
    options.lead_cutoff = Some(cutoff);
    Ok(Reconciler::new(options).plan(&intents, observed))
}

pub async fn plan_once<S: CalendarSource + ?Sized>(
    settings: &SyncSettings,
    source: &S,
    now: DateTime<Utc>,
) -> Result<Plan, SyncError> {
    let window = look_ahead(settings, now)?;
    let observed = observe(settings, source, &window).await?;
    compute_plan(settings, &window, &observed)
}

/// One complete reconciliation: observe, plan, then apply through the provider.
pub async fn run_once<S, P>(
    settings: &SyncSettings,
    source: &S,
    provider: &P,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<RunReport, SyncError>
where
    S: CalendarSource + ?Sized,
    P: BookingProvider + ?Sized,
{
    let plan = plan_once(settings, source, now).await?;
    let executor = BookingExecutor::new(
        provider,
        settings.retry.clone(),
        settings.http_timeout,
        settings.owner_marker.clone(),
    )
    .dry_run(dry_run);
    let report = executor.execute(&plan, now).await;
    info!("{}", report.summary_line());
    Ok(report)
}
