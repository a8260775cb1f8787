use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};

use bookingSync::clients::calendar_client::CalendarSource;
use bookingSync::config::{ResourceFeed, SyncSettings};
use bookingSync::error::{ConfigurationError, FetchError, ProviderError, SyncError};
use bookingSync::models::plan::OperationKind;
use bookingSync::models::report::OperationOutcome;
use bookingSync::models::reservation::IdempotencyKey;
use bookingSync::service::executor::{BookingProvider, CancelRequest, CreateRequest};
use bookingSync::service::sync_flow::{look_ahead, plan_once, run_once};
use bookingSync::tasks::sync_loop::sync_tick;

#[derive(Clone)]
struct Booking {
    id: String,
    resource: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    summary: String,
    categories: Vec<String>,
    key: IdempotencyKey,
}

/// Provider whose bookings are also what the calendar feeds publish.
#[derive(Default)]
struct InMemoryWorld {
    bookings: Mutex<Vec<Booking>>,
    external: Mutex<HashMap<String, Vec<String>>>,
    broken_feed: Mutex<Option<String>>,
    provider_calls: AtomicUsize,
}

impl InMemoryWorld {
    fn add_external(&self, resource: &str, vevent: &str) {
        self.external
            .lock()
            .unwrap()
            .entry(resource.to_string())
            .or_default()
            .push(vevent.to_string());
    }

    fn render(&self, resource: &str) -> String {
        let mut out = String::from("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n");
        for booking in self.bookings.lock().unwrap().iter().filter(|b| b.resource == resource) {
            out.push_str("BEGIN:VEVENT\r\n");
            out.push_str(&format!("UID:{}\r\n", booking.id));
            out.push_str(&format!("DTSTART:{}\r\n", booking.start.format("%Y%m%dT%H%M%SZ")));
            out.push_str(&format!("DTEND:{}\r\n", booking.end.format("%Y%m%dT%H%M%SZ")));
            out.push_str(&format!("SUMMARY:{}\r\n", booking.summary));
            out.push_str(&format!("CATEGORIES:{}\r\n", booking.categories.join(",")));
            out.push_str("STATUS:CONFIRMED\r\nEND:VEVENT\r\n");
        }
        if let Some(events) = self.external.lock().unwrap().get(resource) {
            for event in events {
                out.push_str(event);
            }
        }
        out.push_str("END:VCALENDAR\r\n");
        out
    }
}

#[async_trait::async_trait]
impl CalendarSource for InMemoryWorld {
    async fn fetch(&self, feed: &ResourceFeed) -> Result<String, FetchError> {
        if let Some(body) = self.broken_feed.lock().unwrap().clone() {
            return Ok(body);
        }
        Ok(self.render(&feed.resource))
    }
}

#[async_trait::async_trait]
impl BookingProvider for InMemoryWorld {
    fn supports_idempotency(&self) -> bool {
        false
    }

    async fn find_by_key(&self, resource: &str, key: &IdempotencyKey) -> Result<Option<String>, ProviderError> {
        self.provider_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .bookings
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.resource == resource && &b.key == key)
            .map(|b| b.id.clone()))
    }

    async fn create(&self, request: &CreateRequest) -> Result<String, ProviderError> {
        self.provider_calls.fetch_add(1, Ordering::SeqCst);
        let mut bookings = self.bookings.lock().unwrap();
        let id = format!("bk-{}", bookings.len() + 1);
        bookings.push(Booking {
            id: id.clone(),
            resource: request.resource.clone(),
            start: request.start,
            end: request.end,
            summary: request.summary.clone(),
            categories: request.categories.clone(),
            key: request.idempotency_key.clone(),
        });
        Ok(id)
    }

    async fn cancel(&self, request: &CancelRequest) -> Result<(), ProviderError> {
        self.provider_calls.fetch_add(1, Ordering::SeqCst);
        let mut bookings = self.bookings.lock().unwrap();
        let before = bookings.len();
        bookings.retain(|b| b.id != request.uid);
        if bookings.len() == before {
            return Err(ProviderError::NotFound(request.uid.clone()));
        }
        Ok(())
    }
}

fn settings(extra: &[(&str, &str)]) -> SyncSettings {
    let mut values: HashMap<String, String> = [
        ("TIME_ZONE", "UTC"),
        ("WORKING_HOURS", "09:00-11:00"),
        ("SLOT_MINUTES", "60"),
        ("HORIZON_DAYS", "1"),
        ("RESERVATION_PURPOSE", "Cleaning"),
        ("RESOURCE_FEEDS", "room-a=mem://room-a;room-b=mem://room-b"),
        ("RETRY_BACKOFF_MS", "1"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        values.insert(k.to_string(), v.to_string());
    }
    SyncSettings::from_lookup(|key| values.get(key).cloned()).unwrap()
}

fn monday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn first_run_books_every_free_slot() {
    let world = InMemoryWorld::default();
    let report = run_once(&settings(&[]), &world, &world, monday(), false).await.unwrap();

    assert_eq!(report.entries.len(), 4);
    assert_eq!(report.count(OperationOutcome::Applied), 4);
    assert_eq!(world.bookings.lock().unwrap().len(), 4);
    assert_eq!(report.started_at, monday());
}

#[tokio::test]
async fn second_run_with_no_external_change_is_all_skip() {
    let world = InMemoryWorld::default();
    let settings = settings(&[]);
    run_once(&settings, &world, &world, monday(), false).await.unwrap();
    let calls_after_first = world.provider_calls.load(Ordering::SeqCst);

    let plan = plan_once(&settings, &world, monday()).await.unwrap();
    assert!(plan.is_noop());
    assert_eq!(plan.count(OperationKind::Skip), 4);

    let report = run_once(&settings, &world, &world, monday(), false).await.unwrap();
    assert_eq!(report.count(OperationOutcome::Skipped), 4);
    assert_eq!(world.provider_calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn external_booking_is_respected_and_never_cancelled() {
    let world = InMemoryWorld::default();
    world.add_external(
        "room-a",
        "BEGIN:VEVENT\r\nUID:guest-1\r\nDTSTART:20260302T093000Z\r\nDTEND:20260302T103000Z\r\nSUMMARY:Guest\r\nEND:VEVENT\r\n",
    );
    let report = run_once(&settings(&[]), &world, &world, monday(), false).await.unwrap();

    let skipped: Vec<_> = report
        .entries
        .iter()
        .filter(|e| e.outcome == OperationOutcome::Skipped)
        .map(|e| e.reason.as_str())
        .collect();
    assert_eq!(skipped, vec!["externally occupied", "externally occupied"]);
    assert_eq!(report.count(OperationOutcome::Applied), 2);
    assert!(report.entries.iter().all(|e| e.operation.kind != OperationKind::Cancel));
}

#[tokio::test]
async fn shrinking_the_working_window_cancels_only_owned_bookings() {
    let world = InMemoryWorld::default();
    run_once(&settings(&[]), &world, &world, monday(), false).await.unwrap();
    world.add_external(
        "room-b",
        "BEGIN:VEVENT\r\nUID:guest-2\r\nDTSTART:20260302T140000Z\r\nDTEND:20260302T150000Z\r\nEND:VEVENT\r\n",
    );

    let narrower = settings(&[("WORKING_HOURS", "09:00-10:00")]);
    let report = run_once(&narrower, &world, &world, monday(), false).await.unwrap();

    let cancels: Vec<_> = report
        .entries
        .iter()
        .filter(|e| e.operation.kind == OperationKind::Cancel)
        .collect();
    assert_eq!(cancels.len(), 2);
    assert!(cancels.iter().all(|e| e.outcome == OperationOutcome::Applied));
    assert!(cancels.iter().all(|e| e.operation.target.interval().start.format("%H").to_string() == "10"));
    assert_eq!(world.bookings.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn holiday_blocks_the_day() {
    let world = InMemoryWorld::default();
    world.add_external(
        "room-a",
        "BEGIN:VEVENT\r\nUID:holiday\r\nDTSTART;VALUE=DATE:20260302\r\nDTEND;VALUE=DATE:20260303\r\nSUMMARY:Carnival\r\nEND:VEVENT\r\n",
    );
    let report = run_once(&settings(&[]), &world, &world, monday(), false).await.unwrap();

    assert_eq!(report.entries.len(), 2);
    assert!(report.entries.iter().all(|e| e.operation.target.resource() == "room-b"));
}

#[tokio::test]
async fn malformed_feed_aborts_before_anything_is_applied() {
    let world = InMemoryWorld::default();
    *world.broken_feed.lock().unwrap() = Some("<html>503 Service Unavailable</html>".to_string());

    let result = run_once(&settings(&[]), &world, &world, monday(), false).await;
    assert!(matches!(result, Err(SyncError::Calendar(_))));
    assert_eq!(world.provider_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn plans_are_identical_across_invocations() {
    let world = InMemoryWorld::default();
    world.add_external(
        "room-b",
        "BEGIN:VEVENT\r\nUID:guest-3\r\nDTSTART:20260302T100000Z\r\nDURATION:PT30M\r\nSTATUS:TENTATIVE\r\nEND:VEVENT\r\n",
    );
    let settings = settings(&[]);
    let first = plan_once(&settings, &world, monday()).await.unwrap();
    let second = plan_once(&settings, &world, monday()).await.unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test]
async fn loop_tick_returns_the_report_and_survives_aborted_runs() {
    let world = InMemoryWorld::default();
    let settings = settings(&[]);

    let report = sync_tick(&settings, &world, &world, &[], true, monday()).await.unwrap();
    assert_eq!(report.count(OperationOutcome::Planned), 4);
    assert!(world.bookings.lock().unwrap().is_empty());

    *world.broken_feed.lock().unwrap() = Some("garbage".to_string());
    assert!(sync_tick(&settings, &world, &world, &[], true, monday()).await.is_err());
}

#[test]
fn look_ahead_past_the_end_of_time_is_a_configuration_error() {
    let mut settings = settings(&[]);
    settings.horizon = Duration::MAX;
    assert!(matches!(
        look_ahead(&settings, monday()),
        Err(ConfigurationError::InvalidHorizon(_))
    ));
}

#[tokio::test]
async fn lead_time_keeps_near_slots_out_of_the_plan() {
    let world = InMemoryWorld::default();
    let settings = settings(&[("LEAD_TIME_MINUTES", "600")]);
    let report = run_once(&settings, &world, &world, monday(), false).await.unwrap();

    assert_eq!(report.count(OperationOutcome::Applied), 2);
    assert!(
        world
            .bookings
            .lock()
            .unwrap()
            .iter()
            .all(|b| b.start.format("%H").to_string() == "10")
    );
}

#[tokio::test]
async fn bookings_already_under_way_are_left_alone() {
    let world = InMemoryWorld::default();
    let settings = settings(&[("WORKING_DAYS", "Mon")]);
    run_once(&settings, &world, &world, monday(), false).await.unwrap();

    let half_past_nine = monday() + Duration::minutes(570);
    let plan = plan_once(&settings, &world, half_past_nine).await.unwrap();
    assert!(plan.is_noop());
    assert_eq!(plan.count(OperationKind::Skip), 2);
    assert_eq!(world.bookings.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn recurring_external_booking_blocks_every_instance() {
    let world = InMemoryWorld::default();
    world.add_external(
        "room-a",
        "BEGIN:VEVENT\r\nUID:standup\r\nDTSTART:20260223T090000Z\r\nDTEND:20260223T093000Z\r\nRRULE:FREQ=DAILY;COUNT=30\r\nEND:VEVENT\r\n",
    );
    let settings = settings(&[("HORIZON_DAYS", "2")]);
    let report = run_once(&settings, &world, &world, monday(), false).await.unwrap();

    let occupied: Vec<_> = report
        .entries
        .iter()
        .filter(|e| e.reason == "externally occupied")
        .map(|e| e.operation.target.interval().start)
        .collect();
    assert_eq!(
        occupied,
        vec![
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap(),
        ]
    );
    assert_eq!(report.count(OperationOutcome::Applied), 6);
}
