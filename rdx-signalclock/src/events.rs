//! Defines all public event types broadcast by the controller.
//!
//! Listeners subscribe to these streams to log, display or assert on what the
//! controller is doing. Sending never blocks and never fails the sender: an
//! event with no subscribers is simply dropped.

use crate::common::ApproachId;
use crate::signal::OutputVector;
use crate::table::PhaseKind;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Events related to the lifecycle of the controller itself.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Fired once when the controller's background units are running.
    ControllerStarted { timestamp: Instant },
    /// Fired when the selector gate changes state.
    GateChanged { enabled: bool },
    /// Fired once after every unit has stopped.
    ControllerShutdown,
}

/// Events emitted by the phase executor.
#[derive(Debug, Clone)]
pub enum PhaseEvent {
    /// A master cycle is about to begin.
    CycleStarted { cycle: u64 },
    /// An output vector was driven and will be held for `hold`.
    PhaseAsserted {
        cycle: u64,
        approach: ApproachId,
        phase: PhaseKind,
        vector: OutputVector,
        hold: Duration,
    },
    /// Every phase of every approach has been held.
    CycleCompleted { cycle: u64 },
    /// A pending configuration became active at the end of `cycle`.
    ConfigAdopted { cycle: u64, approaches: usize },
    /// The all-off vector was driven (gate policy or shutdown).
    OutputsForcedSafe,
}

/// Events emitted by the configuration refresher.
#[derive(Debug, Clone)]
pub enum RefreshEvent {
    /// A fresh configuration was published to the store.
    Published {
        approaches: usize,
        replaced_pending: bool,
    },
    /// The refresh attempt failed; nothing was published.
    Skipped { reason: String },
}

/// The set of broadcast channels shared by every controller unit.
#[derive(Clone)]
pub struct EventBus {
    system: broadcast::Sender<SystemEvent>,
    phase: broadcast::Sender<PhaseEvent>,
    refresh: broadcast::Sender<RefreshEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        const CHANNEL_CAPACITY: usize = 256;
        let (system, _) = broadcast::channel(64);
        let (phase, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (refresh, _) = broadcast::channel(64);
        Self {
            system,
            phase,
            refresh,
        }
    }

    pub(crate) fn system(&self, event: SystemEvent) {
        self.system.send(event).ok();
    }

    pub(crate) fn phase(&self, event: PhaseEvent) {
        self.phase.send(event).ok();
    }

    pub(crate) fn refresh(&self, event: RefreshEvent) {
        self.refresh.send(event).ok();
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.system.subscribe()
    }

    /// Subscribes to the `PhaseEvent` stream.
    pub fn subscribe_phase_events(&self) -> broadcast::Receiver<PhaseEvent> {
        self.phase.subscribe()
    }

    /// Subscribes to the `RefreshEvent` stream.
    pub fn subscribe_refresh_events(&self) -> broadcast::Receiver<RefreshEvent> {
        self.refresh.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
