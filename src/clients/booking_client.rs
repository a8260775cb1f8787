use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::ProviderError;
use crate::models::reservation::IdempotencyKey;
use crate::service::executor::{BookingProvider, CancelRequest, CreateRequest};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Deserialize)]
struct BookingRecord {
    id: String,
}

/// REST booking provider.
///
/// `POST {base}/reservations`, `GET {base}/reservations?resource=..&idempotency_key=..`
/// and `DELETE {base}/reservations/{uid}`.
pub struct HttpBookingProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    idempotent: bool,
}

impl HttpBookingProvider {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        idempotent: bool,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            idempotent,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = self.authorized(request).send().await.map_err(transport)?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body))
    }
}

fn transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transient(err.to_string())
    }
}

pub fn classify(status: StatusCode, body: &str) -> ProviderError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout,
        StatusCode::NOT_FOUND | StatusCode::GONE => ProviderError::NotFound(detail),
        s if s.is_server_error() => ProviderError::Transient(detail),
        _ => ProviderError::Fatal(detail),
    }
}

#[async_trait]
impl BookingProvider for HttpBookingProvider {
    fn supports_idempotency(&self) -> bool {
        self.idempotent
    }

    async fn find_by_key(
        &self,
        resource: &str,
        key: &IdempotencyKey,
    ) -> Result<Option<String>, ProviderError> {
        let request = self
            .client
            .get(format!("{}/reservations", self.base_url))
            .query(&[("resource", resource), ("idempotency_key", key.as_str())]);
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(ProviderError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let records: Vec<BookingRecord> = response
            .json()
            .await
            .map_err(|e| ProviderError::Fatal(format!("unreadable lookup response: {e}")))?;
        Ok(records.into_iter().next().map(|r| r.id))
    }

    async fn create(&self, request: &CreateRequest) -> Result<String, ProviderError> {
        debug!(resource = %request.resource, key = request.idempotency_key.short(), "creating reservation");
        let http = self
            .client
            .post(format!("{}/reservations", self.base_url))
            .header(IDEMPOTENCY_HEADER, request.idempotency_key.as_str())
            .json(request);
        let record: BookingRecord = self
            .send(http)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Fatal(format!("unreadable create response: {e}")))?;
        Ok(record.id)
    }

    async fn cancel(&self, request: &CancelRequest) -> Result<(), ProviderError> {
        debug!(resource = %request.resource, uid = %request.uid, "cancelling reservation");
        let http = self
            .client
            .delete(format!("{}/reservations/{}", self.base_url, request.uid))
            .header(IDEMPOTENCY_HEADER, request.idempotency_key.as_str());
        self.send(http).await?;
        Ok(())
    }
}

/// Stands in when no provider is configured; every call fails fatally.
pub struct UnconfiguredProvider;

#[async_trait]
impl BookingProvider for UnconfiguredProvider {
    fn supports_idempotency(&self) -> bool {
        true
    }

    async fn find_by_key(&self, _resource: &str, _key: &IdempotencyKey) -> Result<Option<String>, ProviderError> {
        Err(ProviderError::Fatal("no booking provider configured".to_string()))
    }

    async fn create(&self, _request: &CreateRequest) -> Result<String, ProviderError> {
        Err(ProviderError::Fatal("no booking provider configured".to_string()))
    }

    async fn cancel(&self, _request: &CancelRequest) -> Result<(), ProviderError> {
        Err(ProviderError::Fatal("no booking provider configured".to_string()))
    }
}
