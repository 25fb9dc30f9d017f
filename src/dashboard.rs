//! ==============================================================================
//! dashboard.rs - composition of fetchers, stream and screen
//! ==============================================================================
//!
//! purpose:
//!     starts the three producers and one driver task. the driver is the
//!     single update path: it is the only code that writes the Overview,
//!     folding fetcher states and live readings in the order they signal.
//!
//! ```text
//!     ┌──────────────────┐   Fetched<Reading>   ┌──────────────┐
//!     │ HistoryFetcher   │─────────────────────>│              │
//!     ├──────────────────┤   Fetched<Device..>  │    driver    │──> Overview
//!     │ HistoryFetcher   │─────────────────────>│ (this file)  │   (RwLock)
//!     ├──────────────────┤   LiveUpdate         │              │
//!     │ LiveStreamSync   │─────────────────────>│              │
//!     └──────────────────┘                      └──────────────┘
//! ```
//!
//! relationships:
//!     - uses: history.rs, stream.rs, overview.rs
//!     - used by: main.rs, web.rs (shared overview + refresh control)
//!
//! ==============================================================================

use crate::config::DashboardConfig;
use crate::domain::{DeviceEvent, Reading};
use crate::error::FetchError;
use crate::history::{ErrorCallback, FetchControl, FetchHandle, HistoryFetcher, HttpSource, JsonSource};
use crate::overview::Overview;
use crate::stream::{LiveStreamHandle, LiveStreamSync, LiveUpdate, StreamConnector, WsConnector};

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

/// the screen state shared with readers (web handlers, tests)
pub type SharedOverview = Arc<RwLock<Overview>>;

pub struct Dashboard {
    overview: SharedOverview,
    history: FetchControl,
    devices: FetchControl,
    stop: Option<oneshot::Sender<()>>,
    driver: JoinHandle<()>,
}

struct Driver {
    overview: SharedOverview,
    history: FetchHandle<Reading>,
    devices: FetchHandle<DeviceEvent>,
    live: LiveStreamHandle<Reading>,
    no_data_after: Duration,
    show_readings: bool,
}

impl Dashboard {
    /// start against the real backend
    pub fn start(config: &DashboardConfig) -> Self {
        Self::start_with(config, Arc::new(HttpSource::default()), WsConnector)
    }

    /// start with injected transports
    pub fn start_with<S, C>(config: &DashboardConfig, source: Arc<S>, connector: C) -> Self
    where
        S: JsonSource,
        C: StreamConnector,
    {
        let overview = Arc::new(RwLock::new(Overview::new(config.display.timezone)));

        let on_error: ErrorCallback =
            Arc::new(|e: &FetchError| log::error!("[DASHBOARD] no history, relying on the live stream: {}", e));
        let history: FetchHandle<Reading> =
            HistoryFetcher::spawn(source.clone(), config.backend.readings_url(), Some(on_error));
        let devices: FetchHandle<DeviceEvent> = HistoryFetcher::spawn(source, config.backend.devices_url(), None);
        let live: LiveStreamHandle<Reading> = LiveStreamSync::spawn(
            connector,
            config.backend.stream_url(),
            config.stream.reconnect_delay(),
        );

        let history_control = history.control();
        let devices_control = devices.control();
        let (stop, stopped) = oneshot::channel();

        let driver = Driver {
            overview: overview.clone(),
            history,
            devices,
            live,
            no_data_after: config.display.no_data_after(),
            show_readings: config.logging.show_readings,
        };
        let driver = tokio::spawn(driver.run(stopped));

        Self {
            overview,
            history: history_control,
            devices: devices_control,
            stop: Some(stop),
            driver,
        }
    }

    pub fn overview(&self) -> SharedOverview {
        self.overview.clone()
    }

    pub fn history_control(&self) -> FetchControl {
        self.history.clone()
    }

    pub fn devices_control(&self) -> FetchControl {
        self.devices.clone()
    }

    /// tear down: stream closed on purpose, fetchers aborted
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.driver).await {
            log::error!("[DASHBOARD] driver task failed: {}", e);
        }
    }
}

impl Driver {
    async fn run(mut self, mut stopped: oneshot::Receiver<()>) {
        let mut no_data: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                Ok(()) = self.history.changed() => {
                    let fetched = self.history.current();
                    let mut overview = self.overview.write().await;
                    overview.apply_history(&fetched);
                    if fetched.is_settled() && overview.timeline().is_empty() && !overview.is_complete() {
                        no_data = Some(Box::pin(tokio::time::sleep(self.no_data_after)));
                    }
                }
                Ok(()) = self.devices.changed() => {
                    let fetched = self.devices.current();
                    self.overview.write().await.apply_devices(&fetched);
                }
                Some(update) = self.live.next_update() => match update {
                    LiveUpdate::Reading(reading) => {
                        if self.show_readings {
                            log::info!(
                                "[LIVE] Temp: {:.1}°F | Humidity: {:.1}% | {}",
                                reading.temperature,
                                reading.humidity,
                                reading.time
                            );
                        }
                        self.overview.write().await.apply_live(reading);
                        no_data = None;
                    }
                    LiveUpdate::Status(status) => {
                        self.overview.write().await.set_stream_status(status);
                    }
                },
                _ = async {
                    match no_data.as_mut() {
                        Some(timer) => timer.as_mut().await,
                        None => pending().await,
                    }
                } => {
                    no_data = None;
                    let mut overview = self.overview.write().await;
                    if overview.timeline().is_empty() {
                        log::warn!("[DASHBOARD] history is empty and no live reading arrived");
                        overview.mark_complete();
                    }
                }
                _ = &mut stopped => break,
            }
        }

        self.live.shutdown().await;
        log::info!("[DASHBOARD] stopped");
        // fetchers abort when their handles drop with self
    }
}
