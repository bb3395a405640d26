//! The phase executor: replays the active configuration on the outputs.
//!
//! One master cycle walks every approach in order and, for each, its three
//! phases in order: drive the phase's vector, then hold it for the phase
//! duration. Only after the last approach of a cycle does the executor ask the
//! store for a pending configuration, so an approach never runs with a mix of
//! old and new timings.
//!
//! The gate is checked before every cycle and before every phase. A hold that
//! is cut short by the gate closing is replayed in full once the gate reopens,
//! so every vector is held for at least its configured duration.

use crate::common::ApproachId;
use crate::events::{EventBus, PhaseEvent};
use crate::gate::GateHandle;
use crate::pins::{DigitalOutput, OutputBank};
use crate::signal::OutputVector;
use crate::store::ConfigStore;
use crate::table::{Configuration, Phase};
use serde::Deserialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// What the outputs do while the gate is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisabledOutputPolicy {
    /// Leave the last driven vector on the lines.
    #[default]
    Hold,
    /// Drive the all-off vector.
    Safe,
}

enum Hold {
    Completed,
    Interrupted,
}

pub struct PhaseExecutor<O> {
    store: Arc<ConfigStore>,
    bank: OutputBank<O>,
    gate: GateHandle,
    events: EventBus,
    policy: DisabledOutputPolicy,
    inter_cycle_pause: Duration,
    active: Arc<Configuration>,
    cycle: u64,
}

impl<O: DigitalOutput> PhaseExecutor<O> {
    pub async fn new(
        store: Arc<ConfigStore>,
        bank: OutputBank<O>,
        gate: GateHandle,
        events: EventBus,
    ) -> Self {
        let active = store.active().await;
        Self {
            store,
            bank,
            gate,
            events,
            policy: DisabledOutputPolicy::default(),
            inter_cycle_pause: Duration::ZERO,
            active,
            cycle: 0,
        }
    }

    pub fn with_policy(mut self, policy: DisabledOutputPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_inter_cycle_pause(mut self, pause: Duration) -> Self {
        self.inter_cycle_pause = pause;
        self
    }

    /// Runs master cycles until shutdown, then drives the all-off vector.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> OutputBank<O> {
        info!(
            "Phase executor running {} approaches ({:?} per master cycle).",
            self.active.len(),
            self.active.master_cycle_duration()
        );
        loop {
            let flow = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => ControlFlow::Break(()),
                flow = self.master_cycle() => flow,
            };
            if flow.is_break() {
                break;
            }
        }
        info!("Phase executor stopping; forcing outputs to the safe state.");
        self.force_safe();
        self.bank
    }

    async fn master_cycle(&mut self) -> ControlFlow<()> {
        self.await_gate().await?;

        self.cycle += 1;
        let cycle = self.cycle;
        let config = self.active.clone();
        self.events.phase(PhaseEvent::CycleStarted { cycle });

        for approach in config.approaches() {
            for phase in approach.phases() {
                loop {
                    self.await_gate().await?;
                    self.assert_phase(cycle, approach.id(), phase);
                    match self.hold(phase.duration()).await {
                        Hold::Completed => break,
                        Hold::Interrupted => {
                            debug!("Gate closed during {:?} of {}.", phase.kind(), approach.id());
                        }
                    }
                }
            }
        }

        debug!("Master cycle {} completed.", cycle);
        self.events.phase(PhaseEvent::CycleCompleted { cycle });

        if let Some(next) = self.store.take_pending().await {
            info!(
                "Adopted new timing table after cycle {}: {} approaches, {:?} per master cycle.",
                cycle,
                next.len(),
                next.master_cycle_duration()
            );
            self.events.phase(PhaseEvent::ConfigAdopted {
                cycle,
                approaches: next.len(),
            });
            self.active = next;
        }

        if !self.inter_cycle_pause.is_zero() {
            tokio::time::sleep(self.inter_cycle_pause).await;
        }
        ControlFlow::Continue(())
    }

    fn assert_phase(&mut self, cycle: u64, approach: ApproachId, phase: &Phase) {
        self.bank.drive(phase.vector());
        debug!(
            "{} {:?}: {} for {:?}",
            approach,
            phase.kind(),
            phase.vector(),
            phase.duration()
        );
        self.events.phase(PhaseEvent::PhaseAsserted {
            cycle,
            approach,
            phase: phase.kind(),
            vector: phase.vector(),
            hold: phase.duration(),
        });
    }

    async fn hold(&mut self, duration: Duration) -> Hold {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Hold::Completed,
            _ = self.gate.wait_disabled() => Hold::Interrupted,
        }
    }

    /// Returns once the gate is enabled, applying the disabled-output policy
    /// while it is not. Breaks if the gate can never reopen.
    async fn await_gate(&mut self) -> ControlFlow<()> {
        if self.gate.is_enabled() {
            return ControlFlow::Continue(());
        }
        info!("Gate disabled; executor paused.");
        if self.policy == DisabledOutputPolicy::Safe {
            self.force_safe();
        }
        if !self.gate.wait_enabled().await {
            return ControlFlow::Break(());
        }
        info!("Gate enabled; executor resuming.");
        ControlFlow::Continue(())
    }

    fn force_safe(&mut self) {
        self.bank.drive(OutputVector::ALL_OFF);
        self.events.phase(PhaseEvent::OutputsForcedSafe);
    }
}
