//! Error taxonomy for the controller.
//!
//! Startup failures are fatal and surface as [`StartupError`]. Everything that
//! can go wrong inside the background refresh path is a [`RefreshError`] and
//! never leaves the refresher.

use crate::common::{ApproachId, PinId};
use crate::table::PhaseKind;
use std::time::Duration;
use thiserror::Error;

/// No network path could be established.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("no link available: modem unresponsive and no wifi configured")]
    NoLink,

    #[error("wifi '{ssid}' did not associate within {waited:?}")]
    WifiTimeout { ssid: String, waited: Duration },

    #[error("link command '{command}' failed: {reason}")]
    Command { command: String, reason: String },

    #[error("serial device {device} could not be opened: {source}")]
    Serial {
        device: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A remote request (timing table or time of day) failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid timestamp '{0}'")]
    Timestamp(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Remote timing data that decoded but cannot become a `Configuration`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MalformedConfigError {
    #[error("timing table has no approaches")]
    Empty,

    #[error("timing table has {count} approaches but only {slots} output slots exist")]
    TooManyApproaches { count: usize, slots: usize },

    #[error("{approach} carries no timing entry")]
    MissingTimings { approach: ApproachId },

    #[error("{approach} {phase:?} duration {value} is not a positive whole number of seconds")]
    InvalidDuration {
        approach: ApproachId,
        phase: PhaseKind,
        value: f64,
    },

    #[error("output vector '{0}' must be exactly 5 characters of '0' or '1'")]
    InvalidVector(String),
}

/// Reading or driving a digital line failed.
#[derive(Debug, Error)]
pub enum PinError {
    #[error("{pin}: {source}")]
    Io {
        pin: PinId,
        #[source]
        source: std::io::Error,
    },

    #[error("{pin}: unexpected value '{value}'")]
    UnexpectedValue { pin: PinId, value: String },

    #[error("simulated pin state poisoned")]
    Poisoned,
}

/// One refresh attempt failed; the active configuration is left untouched.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Malformed(#[from] MalformedConfigError),
}

/// Fatal faults of the startup sequence.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("connectivity: {0}")]
    Connectivity(#[from] ConnectivityError),

    #[error("time sync failed: {0}")]
    TimeSync(#[source] FetchError),

    #[error("initial timing fetch failed: {0}")]
    InitialFetch(#[source] FetchError),

    #[error("initial timing table rejected: {0}")]
    InitialConfig(#[from] MalformedConfigError),
}
