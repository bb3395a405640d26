//! The controller that wires every unit together.
//!
//! Startup is a fixed, fail-fast sequence: pick a link, set the clock, fetch
//! the first timing table. Only when all three succeed does [`SignalController::run`]
//! build the store and spawn the gate, the refresher and the executor. On
//! shutdown every unit is told to stop and the executor leaves the outputs
//! all-off.

use crate::config::ControllerConfig;
use crate::error::StartupError;
use crate::events::{EventBus, PhaseEvent, RefreshEvent, SystemEvent};
use crate::executor::PhaseExecutor;
use crate::gate::GateController;
use crate::pins::{DigitalInput, DigitalOutput, OutputBank};
use crate::refresher::ConfigRefresher;
use crate::remote::clock::Rtc;
use crate::remote::link::{select_link, LinkKind};
use crate::remote::{ConnectivityProvider, TimeSyncService, TimingFetchService};
use crate::store::ConfigStore;
use crate::table::Configuration;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// The intersection controller.
///
/// Cloning is cheap and yields a handle onto the same event streams.
#[derive(Clone)]
pub struct SignalController {
    config: Arc<ControllerConfig>,
    events: EventBus,
}

impl SignalController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config: Arc::new(config),
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Selects the network link, once. Failure is fatal.
    pub async fn establish_link<M, W>(
        &self,
        modem: Option<&M>,
        wifi: Option<&W>,
    ) -> Result<LinkKind, StartupError>
    where
        M: ConnectivityProvider,
        W: ConnectivityProvider,
    {
        Ok(select_link(modem, wifi).await?)
    }

    /// Reads network time once and returns a clock set from it.
    pub async fn sync_clock<T: TimeSyncService>(&self, time: &T) -> Result<Rtc, StartupError> {
        let now = time.now().await.map_err(StartupError::TimeSync)?;
        let mut rtc = Rtc::default();
        rtc.set(now);
        let timezone = self.config.time_service.timezone;
        info!(
            "Clock set: {} ({}).",
            rtc.now_in(timezone).format("%Y-%m-%d %H:%M:%S"),
            timezone.name()
        );
        Ok(rtc)
    }

    /// Fetches and validates the first timing table. Without it the executor
    /// has nothing to run, so any failure is fatal.
    pub async fn initial_configuration<F: TimingFetchService>(
        &self,
        fetcher: &F,
    ) -> Result<Configuration, StartupError> {
        let records = fetcher
            .fetch_timings(self.config.intersection)
            .await
            .map_err(StartupError::InitialFetch)?;
        let config = self.config.slot_table().build(&records)?;
        info!(
            "Initial timing table: {} approaches, {:?} per master cycle.",
            config.len(),
            config.master_cycle_duration()
        );
        Ok(config)
    }

    /// Runs the gate, the refresher and the executor until `shutdown`
    /// resolves, then stops them and leaves the outputs all-off.
    pub async fn run<O, I, F>(
        &self,
        initial: Configuration,
        outputs: O,
        input: I,
        fetcher: F,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()>
    where
        O: DigitalOutput + 'static,
        I: DigitalInput + 'static,
        F: TimingFetchService + 'static,
    {
        info!("SignalController starting up...");
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = &self.config;
        let store = Arc::new(ConfigStore::new(initial));

        let (gate, gate_handle) = GateController::new(
            input,
            config.pins.selector,
            config.gate.poll_interval(),
            config.gate.debounce_samples,
            self.events.clone(),
        );
        let gate_task = tokio::spawn(gate.run(shutdown_tx.subscribe()));

        let refresher = ConfigRefresher::new(
            fetcher,
            config.slot_table(),
            store.clone(),
            gate_handle.clone(),
            self.events.clone(),
            config.intersection,
            config.refresh_interval(),
        );
        let refresher_task = tokio::spawn(refresher.run(shutdown_tx.subscribe()));

        let executor = PhaseExecutor::new(
            store,
            OutputBank::new(outputs, config.pins.outputs),
            gate_handle,
            self.events.clone(),
        )
        .await
        .with_policy(config.executor.on_gate_disabled)
        .with_inter_cycle_pause(Duration::from_millis(config.executor.inter_cycle_pause_ms));
        let executor_task = tokio::spawn(executor.run(shutdown_tx.subscribe()));

        self.events.system(SystemEvent::ControllerStarted {
            timestamp: tokio::time::Instant::now(),
        });

        shutdown.await;

        info!("Shutdown signal received. Broadcasting to all units...");
        if shutdown_tx.send(()).is_err() {
            error!("Failed to send shutdown signal. Some units may already have stopped.");
        }
        join_units(executor_task, refresher_task, gate_task).await?;

        self.events.system(SystemEvent::ControllerShutdown);
        info!("SignalController has shut down.");
        Ok(())
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.events.subscribe_system_events()
    }

    /// Subscribes to the `PhaseEvent` stream.
    pub fn subscribe_phase_events(&self) -> broadcast::Receiver<PhaseEvent> {
        self.events.subscribe_phase_events()
    }

    /// Subscribes to the `RefreshEvent` stream.
    pub fn subscribe_refresh_events(&self) -> broadcast::Receiver<RefreshEvent> {
        self.events.subscribe_refresh_events()
    }
}

/// Waits for every unit to stop, then reports the first one that failed.
async fn join_units<A, B, C>(
    executor: JoinHandle<A>,
    refresher: JoinHandle<B>,
    gate: JoinHandle<C>,
) -> anyhow::Result<()> {
    let (executor, refresher, gate) = tokio::join!(executor, refresher, gate);
    executor?;
    refresher?;
    gate?;
    Ok(())
}
