use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::ResourceFeed;
use crate::error::FetchError;

#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn fetch(&self, feed: &ResourceFeed) -> Result<String, FetchError>;
}

/// Downloads feeds over HTTP(S); `file://` URLs are read from disk.
pub struct HttpCalendarSource {
    client: reqwest::Client,
}

impl HttpCalendarSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| transport(url, e))?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.text().await.map_err(|e| transport(url, e))
    }
}

fn transport(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl CalendarSource for HttpCalendarSource {
    async fn fetch(&self, feed: &ResourceFeed) -> Result<String, FetchError> {
        debug!(resource = %feed.resource, url = %feed.url, "fetching calendar");
        let body = match feed.url.strip_prefix("file://") {
            Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| FetchError::Transport {
                url: feed.url.clone(),
                reason: e.to_string(),
            })?,
            None => self.fetch_http(&feed.url).await?,
        };
        info!(resource = %feed.resource, bytes = body.len(), "calendar downloaded");
        Ok(body)
    }
}
