//! Process composition root.
//!
//! `App` owns one instance of every component and wires them explicitly.

use std::sync::Arc;
use std::time::Duration;

use meteo_core::{AppError, Config, WeatherConfig};
use meteo_weather::{FetcherOptions, RetryPolicy, WeatherProvider};

use crate::broadcast::LocalBroadcaster;
use crate::reading_store::SqliteReadingStore;
use crate::relay::Relay;
use crate::scheduler::{Scheduler, SchedulerOptions};

pub struct App {
    pub store: Arc<SqliteReadingStore>,
    pub broadcaster: Arc<LocalBroadcaster>,
    pub relay: Arc<Relay>,
    pub scheduler: Arc<Scheduler>,
}

fn fetcher_options(config: &WeatherConfig) -> FetcherOptions {
    FetcherOptions {
        api_url: config.api_url.clone(),
        total_timeout: Duration::from_secs(config.total_timeout_secs),
        connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        retry: RetryPolicy::default().with_max_attempts(config.max_attempts),
    }
}

impl App {
    /// Build every component from `config`. Nothing is started.
    ///
    /// # Errors
    /// Fails if the default city is unsupported, the database cannot be
    /// opened, or the HTTP client cannot be created.
    pub fn build(config: &Config) -> Result<Self, AppError> {
        let city = &config.scheduler.default_city;
        if !meteo_weather::is_supported(city) {
            return Err(AppError::Validation(format!(
                "default city {} is not supported",
                city
            )));
        }

        let store = Arc::new(
            SqliteReadingStore::open(&config.database.path)
                .map_err(|e| AppError::Storage(e.to_string()))?,
        );
        tracing::info!("Reading store at {}", config.database.path.display());

        let fetcher = WeatherProvider::new(fetcher_options(&config.weather))
            .map_err(|e| AppError::Upstream(e.to_string()))?;
        let broadcaster = Arc::new(LocalBroadcaster::default());
        let relay = Arc::new(Relay::new(
            config.bus.clone(),
            store.clone(),
            broadcaster.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::new(fetcher),
            store.clone(),
            relay.clone(),
            SchedulerOptions::from(&config.scheduler),
        ));

        Ok(Self {
            store,
            broadcaster,
            relay,
            scheduler,
        })
    }

    /// Connect the relay (a missing bus is not fatal), then start the loop.
    pub async fn start(&self) {
        self.relay.connect().await;
        self.scheduler.start();
    }

    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.relay.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.database.path = dir.path().join("meteo.db");
        config
    }

    #[test]
    fn test_fetcher_options_follow_config() {
        let options = fetcher_options(&WeatherConfig {
            api_url: "http://localhost:9999/v1/forecast".into(),
            total_timeout_secs: 20,
            connect_timeout_secs: 2,
            max_attempts: 5,
        });
        assert_eq!(options.api_url, "http://localhost:9999/v1/forecast");
        assert_eq!(options.total_timeout, Duration::from_secs(20));
        assert_eq!(options.connect_timeout, Duration::from_secs(2));
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(options.retry.base_delay, Duration::from_millis(600));
    }

    #[test]
    fn test_build_rejects_unsupported_default_city() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.scheduler.default_city = "Paris".into();

        let err = App::build(&config).err().unwrap();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_build_and_shutdown_without_start() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(&test_config(&dir)).unwrap();

        assert_eq!(app.store.count().await.unwrap(), 0);
        app.shutdown().await;
    }
}
