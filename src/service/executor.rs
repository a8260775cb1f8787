use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::error::ProviderError;
use crate::models::event::ResourceId;
use crate::models::plan::{Operation, OperationKind, OperationTarget, Plan};
use crate::models::report::{OperationOutcome, ReportEntry, RunReport};
use crate::models::reservation::{IdempotencyKey, ReservationIntent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): base, 2x base, 4x base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub resource: ResourceId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: String,
    pub description: String,
    pub categories: Vec<String>,
    pub idempotency_key: IdempotencyKey,
}

impl CreateRequest {
    pub fn for_intent(intent: &ReservationIntent, owner_marker: &str) -> Self {
        Self {
            resource: intent.resource.clone(),
            start: intent.interval.start,
            end: intent.interval.end,
            summary: intent.purpose.clone(),
            description: format!("{} key={}", owner_marker, intent.key),
            categories: vec![owner_marker.to_string()],
            idempotency_key: intent.key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub uid: String,
    pub resource: ResourceId,
    pub idempotency_key: IdempotencyKey,
}

#[async_trait]
pub trait BookingProvider: Send + Sync {
    /// Whether the provider deduplicates creates carrying the same idempotency key.
    fn supports_idempotency(&self) -> bool;

    async fn find_by_key(
        &self,
        resource: &str,
        key: &IdempotencyKey,
    ) -> Result<Option<String>, ProviderError>;

    async fn create(&self, request: &CreateRequest) -> Result<String, ProviderError>;

    async fn cancel(&self, request: &CancelRequest) -> Result<(), ProviderError>;
}

enum Applied {
    Created(String),
    AlreadyPresent(String),
    Cancelled,
    AlreadyGone,
}

pub struct BookingExecutor<'a, P: BookingProvider + ?Sized> {
    provider: &'a P,
    retry: RetryPolicy,
    call_timeout: Duration,
    owner_marker: String,
    dry_run: bool,
}

impl<'a, P: BookingProvider + ?Sized> BookingExecutor<'a, P> {
    pub fn new(provider: &'a P, retry: RetryPolicy, call_timeout: Duration, owner_marker: impl Into<String>) -> Self {
        Self {
            provider,
            retry,
            call_timeout,
            owner_marker: owner_marker.into(),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Applies every operation in order; a failure never stops the remaining ones.
    pub async fn execute(&self, plan: &Plan, started_at: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::new(started_at, self.dry_run);
        for operation in plan.iter() {
            let entry = self.apply(operation).await;
            info!(
                op = ?operation.kind,
                resource = operation.target.resource(),
                key = operation.key.short(),
                outcome = ?entry.outcome,
                attempts = entry.attempts,
                "operation finished"
            );
            report.record(entry);
        }
        report.finish(Utc::now());
        report
    }

    async fn apply(&self, operation: &Operation) -> ReportEntry {
        let entry = |outcome, attempts, reason: String| ReportEntry {
            operation: operation.clone(),
            outcome,
            attempts,
            reason,
        };

        if operation.kind == OperationKind::Skip {
            return entry(OperationOutcome::Skipped, 0, operation.reason.to_string());
        }
        if self.dry_run {
            return entry(OperationOutcome::Planned, 0, operation.reason.to_string());
        }

        let (result, attempts) = match (&operation.kind, &operation.target) {
            (OperationKind::Create, OperationTarget::Intent(intent)) => {
                let request = CreateRequest::for_intent(intent, &self.owner_marker);
                self.with_retry(|| self.create_once(&request)).await
            }
            (OperationKind::Cancel, OperationTarget::Event(event)) => {
                let request = CancelRequest {
                    uid: event.uid.clone(),
                    resource: event.resource.clone(),
                    idempotency_key: operation.key.clone(),
                };
                self.with_retry(|| self.cancel_once(&request)).await
            }
            _ => {
                return entry(
                    OperationOutcome::FailedFatal,
                    0,
                    format!("{:?} does not apply to this target", operation.kind),
                );
            }
        };

        match result {
            Ok(Applied::Created(id)) => entry(OperationOutcome::Applied, attempts, format!("created booking {id}")),
            Ok(Applied::AlreadyPresent(id)) => entry(
                OperationOutcome::Applied,
                attempts,
                format!("booking {id} already present at provider"),
            ),
            Ok(Applied::Cancelled) => entry(OperationOutcome::Applied, attempts, operation.reason.to_string()),
            Ok(Applied::AlreadyGone) => entry(OperationOutcome::Applied, attempts, "booking already gone".to_string()),
            Err(err) if err.is_transient() => entry(OperationOutcome::FailedRetryable, attempts, err.to_string()),
            Err(err) => entry(OperationOutcome::FailedFatal, attempts, err.to_string()),
        }
    }

    async fn with_retry<F, Fut>(&self, mut call: F) -> (Result<Applied, ProviderError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Applied, ProviderError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(applied) => return (Ok(applied), attempt),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient provider error"
                    );
                    sleep(delay).await;
                }
                Err(err) => return (Err(err), attempt),
            }
        }
    }

    async fn bounded<T, Fut>(&self, call: Fut) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        timeout(self.call_timeout, call)
            .await
            .unwrap_or(Err(ProviderError::Timeout))
    }

    async fn create_once(&self, request: &CreateRequest) -> Result<Applied, ProviderError> {
        // A previous attempt (or a concurrent run) may have succeeded without us seeing the reply.
        if !self.provider.supports_idempotency() {
            let existing = self
                .bounded(self.provider.find_by_key(&request.resource, &request.idempotency_key))
                .await?;
            if let Some(id) = existing {
                return Ok(Applied::AlreadyPresent(id));
            }
        }
        let id = self.bounded(self.provider.create(request)).await?;
        Ok(Applied::Created(id))
    }

    async fn cancel_once(&self, request: &CancelRequest) -> Result<Applied, ProviderError> {
        match self.bounded(self.provider.cancel(request)).await {
            Ok(()) => Ok(Applied::Cancelled),
            Err(ProviderError::NotFound(_)) => Ok(Applied::AlreadyGone),
            Err(err) => Err(err),
        }
    }
}
