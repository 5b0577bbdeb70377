use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::cities;
use crate::retry::{classify_error, classify_status, RetryAttempt, RetryPolicy};
use crate::types::{Coordinates, CurrentBlock, FetchError, ForecastResponse, UpstreamFailure, WeatherReport};

pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
const CURRENT_FIELDS: &str = "temperature_2m,wind_speed_10m";

/// Anything that can produce a [`WeatherReport`] for a city.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Fetch current conditions. Cancelling `cancel` aborts in-flight requests
    /// and backoff sleeps with [`FetchError::Cancelled`].
    async fn fetch(
        &self,
        city: &str,
        cancel: &CancellationToken,
    ) -> Result<WeatherReport, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub api_url: String,
    /// Whole-request timeout for each attempt
    pub total_timeout: Duration,
    /// Connect timeout for each attempt
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            api_url: OPEN_METEO_URL.to_string(),
            total_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(6),
            retry: RetryPolicy::default(),
        }
    }
}

/// Open-Meteo client with bounded retries.
#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Arc<Client>,
    api_url: String,
    retry: RetryPolicy,
}

impl WeatherProvider {
    pub fn new(options: FetcherOptions) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(options.total_timeout)
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(FetchError::Setup)?;

        Ok(Self {
            client: Arc::new(client),
            api_url: options.api_url,
            retry: options.retry,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// One request, classified.
    async fn attempt(&self, coords: Coordinates) -> Result<CurrentBlock, UpstreamFailure> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("latitude", coords.latitude.to_string()),
                ("longitude", coords.longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("timezone", "UTC".to_string()),
            ])
            .send()
            .await
            .map_err(classify_error)?;

        if let Some(failure) = classify_status(response.status()) {
            return Err(failure);
        }

        let body = response.bytes().await.map_err(classify_error)?;
        let parsed: ForecastResponse = serde_json::from_slice(&body)
            .map_err(|e| UpstreamFailure::Malformed(e.to_string()))?;

        Ok(parsed.current.unwrap_or_default())
    }
}

#[async_trait]
impl WeatherSource for WeatherProvider {
    #[tracing::instrument(skip(self, cancel), level = "debug")]
    async fn fetch(
        &self,
        city: &str,
        cancel: &CancellationToken,
    ) -> Result<WeatherReport, FetchError> {
        let coords =
            cities::coordinates(city).ok_or_else(|| FetchError::UnknownCity(city.to_string()))?;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = self.attempt(coords) => outcome,
            };

            let failure = match outcome {
                Ok(current) => {
                    if attempt > 1 {
                        tracing::info!("{}: fetch succeeded on attempt {}", city, attempt);
                    }
                    return Ok(WeatherReport {
                        city: city.to_string(),
                        temperature: current.temperature_2m,
                        wind_speed: current.wind_speed_10m,
                    });
                }
                Err(failure) => failure,
            };

            if !failure.is_transient() {
                tracing::warn!("{}: non-retryable failure: {}", city, failure);
                return Err(FetchError::Fatal {
                    city: city.to_string(),
                    source: failure,
                });
            }

            if attempt >= max_attempts {
                tracing::error!("{}: all {} attempts failed", city, max_attempts);
                return Err(FetchError::Exhausted {
                    city: city.to_string(),
                    attempts: attempt,
                    last: failure,
                });
            }

            let delay = self.retry.delay_for_attempt(attempt);
            tracing::warn!(
                "{}: {}",
                city,
                RetryAttempt {
                    attempt,
                    max_attempts,
                    delay,
                    failure: &failure,
                }
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = FetcherOptions::default();
        assert_eq!(options.api_url, OPEN_METEO_URL);
        assert_eq!(options.total_timeout, Duration::from_secs(15));
        assert_eq!(options.connect_timeout, Duration::from_secs(6));
        assert_eq!(options.retry.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_unknown_city_fails_without_request() {
        let provider = WeatherProvider::new(FetcherOptions {
            // Nothing listens here; a request would fail with Connect, not UnknownCity
            api_url: "http://127.0.0.1:9/v1/forecast".to_string(),
            ..FetcherOptions::default()
        })
        .unwrap();

        let err = provider
            .fetch("Atlantis", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnknownCity(ref c) if c == "Atlantis"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let provider = WeatherProvider::new(FetcherOptions::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = provider.fetch("Moscow", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
