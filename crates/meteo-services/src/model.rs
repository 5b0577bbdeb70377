use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meteo_weather::WeatherReport;

use crate::store::StoreError;

/// A persisted weather observation.
///
/// `id` and `created_at` are assigned by the store and never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: i64,
    pub city: String,
    pub temperature: f64,
    #[serde(default)]
    pub wind_speed: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// A reading that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingDraft {
    pub city: String,
    pub temperature: f64,
    #[serde(default)]
    pub wind_speed: Option<f64>,
}

impl ReadingDraft {
    pub fn new(city: impl Into<String>, temperature: f64, wind_speed: Option<f64>) -> Self {
        Self {
            city: city.into(),
            temperature,
            wind_speed,
        }
    }

    /// Build a draft from a fetched report.
    ///
    /// Returns `None` when the upstream omitted the temperature.
    pub fn from_report(report: WeatherReport) -> Option<Self> {
        let temperature = report.temperature?;
        Some(Self::new(report.city, temperature, report.wind_speed))
    }

    /// Check the draft before it reaches storage.
    ///
    /// # Errors
    /// Returns `StoreError::Validation` for an empty or unsupported city and
    /// for non-finite numbers.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.city.trim().is_empty() {
            return Err(StoreError::validation("city must not be empty"));
        }
        if !meteo_weather::is_supported(&self.city) {
            return Err(StoreError::validation(format!(
                "unsupported city: {}",
                self.city
            )));
        }
        if !self.temperature.is_finite() {
            return Err(StoreError::validation("temperature must be a finite number"));
        }
        if self.wind_speed.is_some_and(|w| !w.is_finite()) {
            return Err(StoreError::validation("wind_speed must be a finite number"));
        }
        Ok(())
    }
}
