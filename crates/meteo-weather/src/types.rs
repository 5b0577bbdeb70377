use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Geographic location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Current conditions for one city, normalized from the API response.
///
/// Fields the upstream omitted stay `None`; they are never defaulted to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub city: String,
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
}

/// Subset of the Open-Meteo forecast response we read.
#[derive(Debug, Deserialize)]
pub(crate) struct ForecastResponse {
    #[serde(default)]
    pub current: Option<CurrentBlock>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CurrentBlock {
    #[serde(default)]
    pub temperature_2m: Option<f64>,
    #[serde(default)]
    pub wind_speed_10m: Option<f64>,
}

/// Classified failure of a single request attempt.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamFailure {
    #[error("Request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("Connection failed: {0}")]
    Connect(#[source] reqwest::Error),

    /// The connection broke while exchanging the request or response.
    #[error("Protocol error: {0}")]
    Protocol(#[source] reqwest::Error),

    #[error("Server error: {0}")]
    ServerStatus(StatusCode),

    #[error("Request rejected: {0}")]
    Rejected(StatusCode),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl UpstreamFailure {
    /// Timeouts, connection failures, protocol errors and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connect(_) | Self::Protocol(_) | Self::ServerStatus(_)
        )
    }

    /// Short machine-friendly label, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connect(_) => "connect",
            Self::Protocol(_) => "protocol",
            Self::ServerStatus(_) => "server_status",
            Self::Rejected(_) => "rejected",
            Self::Malformed(_) => "malformed",
            Self::Request(_) => "request",
        }
    }
}

/// Weather fetch errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The city is not in the coordinate table. No request was made.
    #[error("Unknown city: {0}")]
    UnknownCity(String),

    /// A non-retryable upstream failure (4xx, malformed payload).
    #[error("Weather API failed for {city}: {source}")]
    Fatal {
        city: String,
        #[source]
        source: UpstreamFailure,
    },

    /// Every attempt failed with a transient error.
    #[error("Connectivity exhausted for {city} after {attempts} attempts: {last}")]
    Exhausted {
        city: String,
        attempts: u32,
        #[source]
        last: UpstreamFailure,
    },

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("HTTP client setup failed: {0}")]
    Setup(#[source] reqwest::Error),
}

impl FetchError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::UnknownCity(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
