//! # Signalclock
//!
//! A fixed-time traffic-signal controller for a single intersection.
//!
//! The controller replays a table of timed output vectors, one approach after
//! another, on five digital output lines. The table is fetched from a remote
//! timing service at startup and refreshed in the background; a new table only
//! takes effect at the boundary between two master cycles, so a running cycle
//! is never cut short or mixed with another. A single digital input, the
//! automatic-mode selector, gates both execution and refreshing.
//!
//! ## Core Concepts
//!
//! - **OutputVector**: The on/off level of all five output lines at once.
//! - **Configuration**: An ordered list of approaches, each with three timed
//!   phases (green, flashing green, amber).
//! - **ConfigStore**: The hand-off point between the refresher (which
//!   publishes) and the executor (which adopts at cycle boundaries).
//! - **Event-Driven**: Every unit reports what it does on strongly-typed event
//!   streams (`SystemEvent`, `PhaseEvent`, `RefreshEvent`).
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use signalclock::prelude::*;
//! use signalclock::remote::sim::{FixedClock, SimulatedLink, SimulatedTimings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ControllerConfig::from_toml_str(
//!         r#"
//!         [timing_service]
//!         url = "http://timing.local/tiempos/listar"
//!         [pins]
//!         backend = { kind = "simulated" }
//!         "#,
//!     )?;
//!     let controller = SignalController::new(config);
//!
//!     let mut phases = controller.subscribe_phase_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = phases.recv().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!
//!     let timings = SimulatedTimings::new(vec![
//!         RawApproachTiming::new(1, 5.0, 2.0, 3.0),
//!         RawApproachTiming::new(2, 4.0, 1.0, 2.0),
//!     ]);
//!     controller
//!         .establish_link(Some(&SimulatedLink::new("wifi", true)), None::<&SimulatedLink>)
//!         .await?;
//!     controller.sync_clock(&FixedClock::default()).await?;
//!     let initial = controller.initial_configuration(&timings).await?;
//!
//!     let pins = SimulatedPins::new();
//!     pins.drive_input(controller.config().pins.selector, true);
//!     let shutdown = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!     controller.run(initial, pins.clone(), pins, timings, shutdown).await
//! }
//! ```

pub const ENGINE_NAME: &str = "Signalclock";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod common;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod executor;
pub mod gate;
pub mod pins;
pub mod refresher;
pub mod remote;
pub mod signal;
pub mod store;
pub mod table;

/// A prelude module for easy importing of the most common Signalclock types.
pub mod prelude {
    pub use crate::common::{ApproachId, IntersectionId, PinId};
    pub use crate::config::{ControllerConfig, PinBackend};
    pub use crate::controller::SignalController;
    pub use crate::events::{PhaseEvent, RefreshEvent, SystemEvent};
    pub use crate::executor::DisabledOutputPolicy;
    pub use crate::pins::{DigitalInput, DigitalOutput, SimulatedPins};
    pub use crate::signal::{OutputVector, Signal};
    pub use crate::table::{Configuration, PhaseKind, RawApproachTiming};
}
