use std::process::ExitCode;

use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::clients::booking_client::{HttpBookingProvider, UnconfiguredProvider};
use crate::clients::calendar_client::HttpCalendarSource;
use crate::config::SyncSettings;
use crate::error::{ConfigurationError, SyncError};
use crate::service::executor::BookingProvider;
use crate::service::report_sink::{JsonStdoutSink, ReportSink, TracingReportSink, publish_all};
use crate::service::sync_flow;
use crate::tasks::sync_loop;

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "bookingSync=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn provider(settings: &SyncSettings, dry_run: bool) -> Result<Box<dyn BookingProvider>, SyncError> {
    match &settings.provider.url {
        Some(url) => {
            let provider = HttpBookingProvider::new(
                url.clone(),
                settings.provider.token.clone(),
                settings.provider.idempotent,
                settings.http_timeout,
            )
            .map_err(|e| ConfigurationError::invalid("PROVIDER_URL", &e.to_string()))?;
            Ok(Box::new(provider))
        }
        None if dry_run => Ok(Box::new(UnconfiguredProvider)),
        None => Err(ConfigurationError::MissingValue("PROVIDER_URL".to_string()).into()),
    }
}

pub async fn run(settings: &SyncSettings, dry_run: bool) -> Result<ExitCode, SyncError> {
    let source = HttpCalendarSource::new(settings.http_timeout)?;
    let provider = provider(settings, dry_run)?;
    let report = sync_flow::run_once(settings, &source, provider.as_ref(), Utc::now(), dry_run).await?;
    let sinks: [&dyn ReportSink; 2] = [&TracingReportSink, &JsonStdoutSink];
    publish_all(&sinks, &report);
    // Operations that failed are retried by the next run.
    Ok(if report.has_failures() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

pub async fn plan(settings: &SyncSettings) -> Result<ExitCode, SyncError> {
    let source = HttpCalendarSource::new(settings.http_timeout)?;
    let plan = sync_flow::plan_once(settings, &source, Utc::now()).await?;
    match serde_json::to_string_pretty(&plan) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("failed to serialise plan: {}", e);
            return Ok(ExitCode::from(1));
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn watch(settings: &SyncSettings, dry_run: bool) -> Result<ExitCode, SyncError> {
    let source = HttpCalendarSource::new(settings.http_timeout)?;
    let provider = provider(settings, dry_run)?;
    let sinks: [&dyn ReportSink; 1] = [&TracingReportSink];
    info!(interval_secs = settings.sync_interval.as_secs(), "starting sync loop");
    tokio::select! {
        _ = sync_loop::run_sync_loop(settings, &source, provider.as_ref(), &sinks, dry_run) => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(ExitCode::SUCCESS)
}
