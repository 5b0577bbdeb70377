//! Single-flight acquisition cycles.
//!
//! A cycle is fetch → persist → publish, run under one gate so no two cycles
//! interleave. Callers queue on the gate in arrival order. The background loop
//! runs the same cycle for the default city every period and survives failed
//! cycles; on-demand callers get the error.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use meteo_core::SchedulerConfig;
use meteo_weather::WeatherSource;

use crate::error::ServiceError;
use crate::event::{Event, SOURCE_BACKGROUND, SOURCE_MANUAL};
use crate::model::{Reading, ReadingDraft};
use crate::relay::Relay;
use crate::store::ReadingStore;

/// How long `stop()` waits for the loop before aborting it.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub default_city: String,
    pub period: Duration,
    pub initial_delay: Duration,
    pub stop_grace: Duration,
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            default_city: config.default_city.clone(),
            period: config.period(),
            initial_delay: config.initial_delay(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

struct Cycle {
    fetcher: Arc<dyn WeatherSource>,
    store: Arc<dyn ReadingStore>,
    relay: Arc<Relay>,
    gate: tokio::sync::Mutex<()>,
}

impl Cycle {
    async fn run(
        &self,
        city: &str,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Reading, ServiceError> {
        let _gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
            guard = self.gate.lock() => guard,
        };

        let report = self.fetcher.fetch(city, cancel).await?;
        let draft = ReadingDraft::from_report(report).ok_or_else(|| {
            ServiceError::IncompleteReport {
                city: city.to_string(),
            }
        })?;
        let reading = self.store.create(draft).await?;

        let event = Event::created_external(reading.clone(), source);
        let via_bus = self.relay.dispatch(&event).await;
        tracing::info!(
            "Stored {} reading {} for {}: {} (delivered via {})",
            source,
            reading.id,
            reading.city,
            reading.temperature,
            if via_bus { "bus" } else { "local broadcast" }
        );

        Ok(reading)
    }
}

/// Returns `false` if cancelled before `duration` elapsed.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn run_loop(cycle: Arc<Cycle>, options: SchedulerOptions, cancel: CancellationToken) {
    if !sleep_unless_cancelled(options.initial_delay, &cancel).await {
        return;
    }

    loop {
        match cycle
            .run(&options.default_city, SOURCE_BACKGROUND, &cancel)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_cancelled() => break,
            Err(e) => tracing::error!(
                "Background cycle for {} failed: {}",
                options.default_city,
                e
            ),
        }

        if !sleep_unless_cancelled(options.period, &cancel).await {
            break;
        }
    }
    tracing::debug!("Scheduler loop exited");
}

struct Control {
    state: SchedulerState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    cycle: Arc<Cycle>,
    options: SchedulerOptions,
    control: Mutex<Control>,
}

impl Scheduler {
    pub fn new(
        fetcher: Arc<dyn WeatherSource>,
        store: Arc<dyn ReadingStore>,
        relay: Arc<Relay>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            cycle: Arc::new(Cycle {
                fetcher,
                store,
                relay,
                gate: tokio::sync::Mutex::new(()),
            }),
            options,
            control: Mutex::new(Control {
                state: SchedulerState::Idle,
                cancel: CancellationToken::new(),
                task: None,
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.control.lock().state
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Run one cycle for `city`, waiting for any cycle in progress.
    ///
    /// # Errors
    /// Fetch and store failures are returned to the caller.
    pub async fn run_once(&self, city: &str, source: &str) -> Result<Reading, ServiceError> {
        self.run_once_cancellable(city, source, &CancellationToken::new())
            .await
    }

    /// [`run_once`](Self::run_once) that gives up when `cancel` fires, whether
    /// waiting for the gate, fetching or backing off.
    pub async fn run_once_cancellable(
        &self,
        city: &str,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Reading, ServiceError> {
        self.cycle.run(city, source, cancel).await
    }

    /// On-demand cycle, labelled `manual`.
    pub async fn run_manual(&self, city: &str) -> Result<Reading, ServiceError> {
        self.run_once(city, SOURCE_MANUAL).await
    }

    /// Start the background loop. No-op while it is already running.
    pub fn start(&self) {
        let mut control = self.control.lock();
        let alive = control.task.as_ref().is_some_and(|task| !task.is_finished());
        if control.state == SchedulerState::Running && alive {
            tracing::debug!("Scheduler already running");
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.cycle.clone(),
            self.options.clone(),
            cancel.clone(),
        ));
        control.cancel = cancel;
        control.task = Some(task);
        control.state = SchedulerState::Running;

        tracing::info!(
            "Scheduler started: {} every {}s",
            self.options.default_city,
            self.options.period.as_secs()
        );
    }

    /// Cancel the background loop and wait for it to exit.
    ///
    /// Safe to call when never started. A loop that outlives the grace period
    /// is aborted.
    pub async fn stop(&self) {
        let task = {
            let mut control = self.control.lock();
            if control.state != SchedulerState::Running {
                return;
            }
            control.state = SchedulerState::Stopped;
            control.cancel.cancel();
            control.task.take()
        };
        let Some(mut task) = task else {
            return;
        };

        match tokio::time::timeout(self.options.stop_grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => tracing::debug!("Scheduler loop cancelled"),
            Ok(Err(e)) => tracing::error!("Scheduler loop failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    "Scheduler loop did not stop within {:?}, aborting",
                    self.options.stop_grace
                );
                task.abort();
                let _ = task.await;
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.control.get_mut().cancel.cancel();
    }
}
