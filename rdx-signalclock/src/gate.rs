//! The selector gate.
//!
//! `GateController` samples the selector input at a fixed poll interval and
//! publishes the debounced level on a `watch` channel. The executor and the
//! refresher each hold a `GateHandle` and suspend on it instead of spinning on
//! the raw input.

use crate::common::PinId;
use crate::events::{EventBus, SystemEvent};
use crate::pins::DigitalInput;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Read side of the gate, cheap to clone.
#[derive(Debug, Clone)]
pub struct GateHandle {
    rx: watch::Receiver<bool>,
}

impl GateHandle {
    pub fn is_enabled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Suspends until the gate is enabled.
    ///
    /// Returns `false` if the gate was torn down while disabled, in which case
    /// it will never open again.
    pub async fn wait_enabled(&mut self) -> bool {
        self.rx.wait_for(|enabled| *enabled).await.is_ok()
    }

    /// Suspends until the gate is disabled. Never resolves once the gate has
    /// been torn down while enabled.
    pub async fn wait_disabled(&mut self) {
        if self.rx.wait_for(|enabled| !*enabled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A gate driven by hand instead of by an input line.
#[derive(Debug)]
pub struct ManualGate {
    tx: watch::Sender<bool>,
}

impl ManualGate {
    pub fn new(enabled: bool) -> (Self, GateHandle) {
        let (tx, rx) = watch::channel(enabled);
        (Self { tx }, GateHandle { rx })
    }

    pub fn set(&self, enabled: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
    }
}

/// Samples the selector input and debounces it.
pub struct GateController<I> {
    input: I,
    pin: PinId,
    poll_interval: Duration,
    debounce_samples: u32,
    candidate: Option<(bool, u32)>,
    tx: watch::Sender<bool>,
    events: EventBus,
}

impl<I: DigitalInput> GateController<I> {
    /// Creates the controller, seeding the gate from one raw read of `pin`.
    ///
    /// A new level must be read on `debounce_samples` consecutive polls before
    /// it is adopted; `1` adopts every raw read. An unreadable input starts
    /// the gate disabled. The poll interval is at least one millisecond.
    pub fn new(
        input: I,
        pin: PinId,
        poll_interval: Duration,
        debounce_samples: u32,
        events: EventBus,
    ) -> (Self, GateHandle) {
        let initial = input.get(pin).unwrap_or_else(|e| {
            warn!("Selector input unreadable at startup, gate starts disabled: {}", e);
            false
        });
        info!(
            "Selector gate on {} starts {}.",
            pin,
            if initial { "enabled" } else { "disabled" }
        );
        let (tx, rx) = watch::channel(initial);
        let controller = Self {
            input,
            pin,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            debounce_samples: debounce_samples.max(1),
            candidate: None,
            tx,
            events,
        };
        (controller, GateHandle { rx })
    }

    /// Takes one sample and returns the (debounced) gate state.
    pub fn sample(&mut self) -> bool {
        let current = *self.tx.borrow();
        let raw = match self.input.get(self.pin) {
            Ok(level) => level,
            Err(e) => {
                warn!("Selector read failed, keeping gate {}: {}", current, e);
                return current;
            }
        };

        if raw == current {
            self.candidate = None;
            return current;
        }

        let seen = match self.candidate {
            Some((level, count)) if level == raw => count + 1,
            _ => 1,
        };
        if seen < self.debounce_samples {
            self.candidate = Some((raw, seen));
            return current;
        }

        self.candidate = None;
        self.tx.send_replace(raw);
        info!("Selector gate {}.", if raw { "enabled" } else { "disabled" });
        self.events.system(SystemEvent::GateChanged { enabled: raw });
        raw
    }

    /// Polls the input until shutdown.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    self.sample();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::SimulatedPins;

    const SELECTOR: PinId = PinId(4);

    fn controller(pins: &SimulatedPins, debounce: u32) -> (GateController<SimulatedPins>, GateHandle) {
        GateController::new(
            pins.clone(),
            SELECTOR,
            Duration::from_millis(100),
            debounce,
            EventBus::new(),
        )
    }

    #[test]
    fn seeds_from_the_first_read() {
        let pins = SimulatedPins::new();
        pins.drive_input(SELECTOR, true);
        let (_ctl, gate) = controller(&pins, 3);
        assert!(gate.is_enabled());
    }

    #[test]
    fn a_change_needs_consecutive_agreeing_samples() {
        let pins = SimulatedPins::new();
        let (mut ctl, gate) = controller(&pins, 3);
        assert!(!gate.is_enabled());

        pins.drive_input(SELECTOR, true);
        assert!(!ctl.sample());
        assert!(!ctl.sample());
        // A bounce back low restarts the count.
        pins.drive_input(SELECTOR, false);
        assert!(!ctl.sample());
        pins.drive_input(SELECTOR, true);
        assert!(!ctl.sample());
        assert!(!ctl.sample());
        assert!(ctl.sample());
        assert!(gate.is_enabled());
    }

    #[test]
    fn single_sample_debounce_follows_the_raw_input() {
        let pins = SimulatedPins::new();
        let (mut ctl, gate) = controller(&pins, 1);
        pins.drive_input(SELECTOR, true);
        assert!(ctl.sample());
        pins.drive_input(SELECTOR, false);
        assert!(!ctl.sample());
        assert!(!gate.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn handles_wake_on_transitions() {
        let pins = SimulatedPins::new();
        let (ctl, mut gate) = controller(&pins, 2);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(ctl.run(shutdown_rx));

        pins.drive_input(SELECTOR, true);
        assert!(gate.wait_enabled().await);
        pins.drive_input(SELECTOR, false);
        gate.wait_disabled().await;
        assert!(!gate.is_enabled());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        // The controller is gone: a disabled gate can never reopen.
        assert!(!gate.wait_enabled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_still_polls() {
        let pins = SimulatedPins::new();
        let (ctl, mut gate) =
            GateController::new(pins.clone(), SELECTOR, Duration::ZERO, 0, EventBus::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(ctl.run(shutdown_rx));

        pins.drive_input(SELECTOR, true);
        assert!(gate.wait_enabled().await);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn manual_gate_drives_handles() {
        let (manual, mut gate) = ManualGate::new(false);
        manual.set(true);
        assert!(gate.wait_enabled().await);
        manual.set(false);
        gate.wait_disabled().await;
    }
}
