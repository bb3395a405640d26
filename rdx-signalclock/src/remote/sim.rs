//! In-process stand-ins for the remote collaborators.
//!
//! Used by the bench shell and by tests. Clones share state, so a handle kept
//! outside the controller can script what the controller sees.

use super::{ConnectivityProvider, TimeSyncService, TimingFetchService};
use crate::common::IntersectionId;
use crate::error::{ConnectivityError, FetchError};
use crate::table::RawApproachTiming;
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A link that is either up or down.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    name: &'static str,
    up: bool,
    connects: Arc<AtomicUsize>,
}

impl SimulatedLink {
    pub fn new(name: &'static str, up: bool) -> Self {
        Self {
            name,
            up,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }
}

impl ConnectivityProvider for SimulatedLink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn is_available(&self) -> bool {
        self.up
    }

    async fn connect(&self) -> Result<(), ConnectivityError> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        if self.up {
            Ok(())
        } else {
            Err(ConnectivityError::Command {
                command: format!("simulated {}", self.name),
                reason: "link down".to_string(),
            })
        }
    }
}

/// A time source that answers with the host clock, or a fixed instant.
#[derive(Debug, Clone, Default)]
pub struct FixedClock {
    at: Option<DateTime<FixedOffset>>,
}

impl FixedClock {
    pub fn at(at: DateTime<FixedOffset>) -> Self {
        Self { at: Some(at) }
    }
}

impl TimeSyncService for FixedClock {
    async fn now(&self) -> Result<DateTime<FixedOffset>, FetchError> {
        Ok(self.at.unwrap_or_else(|| Utc::now().fixed_offset()))
    }
}

#[derive(Debug)]
enum Script {
    Serve(Vec<RawApproachTiming>),
    Fail(String),
}

/// A scripted timing service. Serves the last table set with
/// [`set_timings`](Self::set_timings) until told to fail.
#[derive(Debug, Clone)]
pub struct SimulatedTimings {
    script: Arc<Mutex<Script>>,
    calls: Arc<AtomicUsize>,
}

impl SimulatedTimings {
    pub fn new(records: Vec<RawApproachTiming>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::Serve(records))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_timings(&self, records: Vec<RawApproachTiming>) {
        if let Ok(mut script) = self.script.lock() {
            *script = Script::Serve(records);
        }
    }

    /// Every fetch fails with `reason` until new timings are set.
    pub fn fail(&self, reason: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            *script = Script::Fail(reason.into());
        }
    }

    /// Number of fetches served so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl TimingFetchService for SimulatedTimings {
    async fn fetch_timings(
        &self,
        _intersection: IntersectionId,
    ) -> Result<Vec<RawApproachTiming>, FetchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let script = self
            .script
            .lock()
            .map_err(|_| FetchError::Unavailable("simulator state poisoned".to_string()))?;
        match &*script {
            Script::Serve(records) => Ok(records.clone()),
            Script::Fail(reason) => Err(FetchError::Unavailable(reason.clone())),
        }
    }
}
