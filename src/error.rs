use thiserror::Error;

/// The feed could not be read as structured calendar data at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("malformed calendar: {reason}")]
    Malformed { reason: String },
}

impl CalendarError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown time zone: {0}")]
    InvalidTimeZone(String),

    #[error("working window for {day} is empty ({start}-{end})")]
    EmptyWorkingWindow {
        day: String,
        start: String,
        end: String,
    },

    #[error("invalid working hours '{0}', expected HH:MM-HH:MM")]
    InvalidWorkingHours(String),

    #[error("slot length of {0} minutes does not fit any working window")]
    InvalidSlotLength(i64),

    #[error("look-ahead horizon must be between 1 and 3650 days, got {0}")]
    InvalidHorizon(i64),

    #[error("no working days configured")]
    NoWorkingDays,

    #[error("no resources configured")]
    NoResources,

    #[error("missing required setting {0}")]
    MissingValue(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl ConfigurationError {
    pub fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Failure reported by the booking provider for a single operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider call timed out")]
    Timeout,

    #[error("provider rate limited the request")]
    RateLimited,

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("booking or resource not found: {0}")]
    NotFound(String),

    #[error("provider rejected the request: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout | ProviderError::RateLimited | ProviderError::Transient(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to download calendar from {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("calendar download from {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("calendar download from {url} timed out")]
    Timeout { url: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Errors that abort a whole run before anything is applied.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}
