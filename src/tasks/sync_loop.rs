use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::error;

use crate::clients::calendar_client::CalendarSource;
use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::models::report::RunReport;
use crate::service::executor::BookingProvider;
use crate::service::report_sink::{ReportSink, publish_all};
use crate::service::sync_flow;

pub async fn run_sync_loop<S, P>(
    settings: &SyncSettings,
    source: &S,
    provider: &P,
    sinks: &[&dyn ReportSink],
    dry_run: bool,
) where
    S: CalendarSource + ?Sized,
    P: BookingProvider + ?Sized,
{
    loop {
        let _ = sync_tick(settings, source, provider, sinks, dry_run, Utc::now()).await;
        sleep(settings.sync_interval).await;
    }
}

/// One loop iteration. An aborted run is logged and the next tick starts fresh.
pub async fn sync_tick<S, P>(
    settings: &SyncSettings,
    source: &S,
    provider: &P,
    sinks: &[&dyn ReportSink],
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<RunReport, SyncError>
where
    S: CalendarSource + ?Sized,
    P: BookingProvider + ?Sized,
{
    match sync_flow::run_once(settings, source, provider, now, dry_run).await {
        Ok(report) => {
            publish_all(sinks, &report);
            Ok(report)
        }
        Err(e) => {
            error!("sync run aborted: {}", e);
            Err(e)
        }
    }
}
