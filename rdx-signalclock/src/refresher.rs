//! The background configuration refresher.
//!
//! While the gate is enabled the refresher waits one full interval, fetches
//! the timing table once and publishes it to the store. A failed or malformed
//! fetch is logged and skipped; the next attempt comes one full interval
//! later. Disabling the gate discards the running wait; the timer restarts
//! from zero when the gate reopens.
//!
//! ```text
//! Idle --gate enabled--> Waiting --interval--> Fetching --> Publish | Skip --> Waiting
//!   ^                       |
//!   +----gate disabled------+
//! ```

use crate::common::IntersectionId;
use crate::error::RefreshError;
use crate::events::{EventBus, RefreshEvent};
use crate::gate::GateHandle;
use crate::remote::TimingFetchService;
use crate::store::ConfigStore;
use crate::table::SlotTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshState {
    Idle,
    Waiting,
    Fetching,
}

pub struct ConfigRefresher<F> {
    fetcher: F,
    slots: SlotTable,
    store: Arc<ConfigStore>,
    gate: GateHandle,
    events: EventBus,
    intersection: IntersectionId,
    interval: Duration,
}

impl<F: TimingFetchService> ConfigRefresher<F> {
    pub fn new(
        fetcher: F,
        slots: SlotTable,
        store: Arc<ConfigStore>,
        gate: GateHandle,
        events: EventBus,
        intersection: IntersectionId,
        interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            slots,
            store,
            gate,
            events,
            intersection,
            interval,
        }
    }

    /// Runs the refresh loop until shutdown or until the gate is torn down.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Config refresher polling every {:?}.", self.interval);
        let mut state = RefreshState::Idle;
        loop {
            trace!("Refresher state: {:?}", state);
            state = match state {
                RefreshState::Idle => {
                    let enabled = tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        enabled = self.gate.wait_enabled() => enabled,
                    };
                    if !enabled {
                        break;
                    }
                    RefreshState::Waiting
                }
                RefreshState::Waiting => {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        _ = self.gate.wait_disabled() => {
                            debug!("Gate disabled; refresh timer discarded.");
                            RefreshState::Idle
                        }
                        _ = tokio::time::sleep(self.interval) => RefreshState::Fetching,
                    }
                }
                RefreshState::Fetching => {
                    if !self.gate.is_enabled() {
                        RefreshState::Idle
                    } else {
                        tokio::select! {
                            biased;
                            _ = shutdown_rx.recv() => break,
                            result = self.refresh_once() => {
                                if let Err(e) = result {
                                    warn!("Timing refresh skipped: {}", e);
                                    self.events.refresh(RefreshEvent::Skipped {
                                        reason: e.to_string(),
                                    });
                                }
                                RefreshState::Waiting
                            }
                        }
                    }
                }
            };
        }
        debug!("Config refresher stopped.");
    }

    /// Fetches once and publishes the result. Returns the number of approaches
    /// published.
    pub async fn refresh_once(&self) -> Result<usize, RefreshError> {
        info!("Checking timing service for intersection {}...", self.intersection);
        let records = self.fetcher.fetch_timings(self.intersection).await?;
        let config = self.slots.build(&records)?;
        let approaches = config.len();
        let replaced_pending = self.store.publish(config).await;
        info!(
            "New timing table for {} approaches published; it applies after the current cycle.",
            approaches
        );
        self.events.refresh(RefreshEvent::Published {
            approaches,
            replaced_pending,
        });
        Ok(approaches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MalformedConfigError;
    use crate::gate::ManualGate;
    use crate::remote::sim::SimulatedTimings;
    use crate::table::{Configuration, RawApproachTiming};

    const INTERVAL: Duration = Duration::from_secs(300);

    fn records(green: f64) -> Vec<RawApproachTiming> {
        vec![
            RawApproachTiming::new(1, green, 2.0, 3.0),
            RawApproachTiming::new(2, 4.0, 1.0, 2.0),
        ]
    }

    fn initial() -> Configuration {
        SlotTable::default().build(&records(5.0)).unwrap()
    }

    struct Rig {
        timings: SimulatedTimings,
        store: Arc<ConfigStore>,
        gate: ManualGate,
        events: broadcast::Receiver<RefreshEvent>,
        _shutdown: broadcast::Sender<()>,
    }

    fn start(gate_open: bool) -> Rig {
        let timings = SimulatedTimings::new(records(9.0));
        let store = Arc::new(ConfigStore::new(initial()));
        let bus = EventBus::new();
        let events = bus.subscribe_refresh_events();
        let (gate, handle) = ManualGate::new(gate_open);
        let refresher = ConfigRefresher::new(
            timings.clone(),
            SlotTable::default(),
            store.clone(),
            handle,
            bus,
            IntersectionId(1),
            INTERVAL,
        );
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(refresher.run(shutdown_rx));
        Rig {
            timings,
            store,
            gate,
            events,
            _shutdown: shutdown,
        }
    }

    async fn sleep_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_once_per_interval() {
        let mut rig = start(true);

        sleep_secs(299).await;
        assert_eq!(rig.timings.calls(), 0);
        sleep_secs(2).await;
        assert_eq!(rig.timings.calls(), 1);
        assert!(matches!(
            rig.events.recv().await.unwrap(),
            RefreshEvent::Published { approaches: 2, replaced_pending: false }
        ));
        let adopted = rig.store.take_pending().await.unwrap();
        assert_eq!(adopted.approaches()[0].phases()[0].duration(), Duration::from_secs(9));

        sleep_secs(300).await;
        assert_eq!(rig.timings.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_is_skipped_and_retried_a_full_interval_later() {
        let mut rig = start(true);
        rig.timings.fail("connection refused");

        sleep_secs(301).await;
        assert_eq!(rig.timings.calls(), 1);
        match rig.events.recv().await.unwrap() {
            RefreshEvent::Skipped { reason } => assert!(reason.contains("connection refused")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rig.store.take_pending().await.is_none());
        assert_eq!(*rig.store.active().await, initial());

        sleep_secs(298).await;
        assert_eq!(rig.timings.calls(), 1);
        sleep_secs(2).await;
        assert_eq!(rig.timings.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_tables_are_dropped() {
        let mut rig = start(true);
        rig.timings.set_timings(vec![RawApproachTiming::new(1, 2.5, 1.0, 1.0)]);

        sleep_secs(301).await;
        match rig.events.recv().await.unwrap() {
            RefreshEvent::Skipped { reason } => {
                assert!(reason.contains("positive whole number"), "{reason}")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rig.store.take_pending().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn no_fetch_while_the_gate_is_disabled() {
        let rig = start(false);
        sleep_secs(1000).await;
        assert_eq!(rig.timings.calls(), 0);

        rig.gate.set(true);
        sleep_secs(299).await;
        assert_eq!(rig.timings.calls(), 0);
        sleep_secs(2).await;
        assert_eq!(rig.timings.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_the_gate_restarts_the_wait() {
        let rig = start(true);
        sleep_secs(200).await;
        rig.gate.set(false);
        sleep_secs(10).await;
        rig.gate.set(true);

        // 200s of the first wait were discarded.
        sleep_secs(150).await;
        assert_eq!(rig.timings.calls(), 0);
        sleep_secs(151).await;
        assert_eq!(rig.timings.calls(), 1);
    }

    #[tokio::test]
    async fn refresh_once_reports_malformed_tables() {
        let timings = SimulatedTimings::new(Vec::new());
        let (_gate, handle) = ManualGate::new(true);
        let refresher = ConfigRefresher::new(
            timings,
            SlotTable::default(),
            Arc::new(ConfigStore::new(initial())),
            handle,
            EventBus::new(),
            IntersectionId(1),
            INTERVAL,
        );
        assert!(matches!(
            refresher.refresh_once().await,
            Err(RefreshError::Malformed(MalformedConfigError::Empty))
        ));
    }
}
