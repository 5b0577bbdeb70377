use thiserror::Error;

use meteo_core::AppError;
use meteo_weather::FetchError;

use crate::store::StoreError;

/// Failure of a fetch → persist → publish cycle.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The upstream answered without a temperature.
    #[error("Weather API returned no temperature for {city}")]
    IncompleteReport { city: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cancelled while waiting for the gate.
    #[error("Cycle cancelled")]
    Cancelled,
}

impl ServiceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Fetch(FetchError::Cancelled))
    }

    pub fn is_validation(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_validation(),
            Self::Store(e) => e.is_validation(),
            _ => false,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        if e.is_cancelled() {
            return AppError::Cancelled;
        }
        if e.is_validation() {
            return AppError::Validation(e.to_string());
        }
        match e {
            ServiceError::Store(e) => AppError::Storage(e.to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_city_is_client_error() {
        let app: AppError = ServiceError::from(FetchError::UnknownCity("Paris".into())).into();
        assert!(app.is_client_error());
        assert_eq!(app.http_status(), 400);
    }

    #[test]
    fn test_upstream_failures_are_server_errors() {
        let app: AppError = ServiceError::IncompleteReport {
            city: "Moscow".into(),
        }
        .into();
        assert!(matches!(app, AppError::Upstream(_)));
        assert_eq!(app.http_status(), 500);

        let app: AppError = ServiceError::from(StoreError::storage("disk full")).into();
        assert!(matches!(app, AppError::Storage(_)));
        assert_eq!(app.http_status(), 500);
    }

    #[test]
    fn test_cancellation_maps_to_cancelled() {
        let app: AppError = ServiceError::from(FetchError::Cancelled).into();
        assert!(matches!(app, AppError::Cancelled));
        assert!(ServiceError::Cancelled.is_cancelled());
    }
}
