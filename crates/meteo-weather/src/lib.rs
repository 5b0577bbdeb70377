//! Weather acquisition for Meteo
//!
//! Resolves supported cities to coordinates and fetches current conditions
//! from the Open-Meteo API with bounded, jittered retries.

pub mod cities;
pub mod provider;
pub mod retry;
pub mod types;

pub use cities::{coordinates, is_supported, SUPPORTED_CITIES};
pub use provider::{FetcherOptions, WeatherProvider, WeatherSource};
pub use retry::{RetryAttempt, RetryPolicy};
pub use types::*;
