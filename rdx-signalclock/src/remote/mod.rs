//! External collaborators: connectivity, time of day and the timing table.
//!
//! The core only sees the three traits below. Each has one production adapter
//! and one simulator used by the bench shell and tests.

use crate::common::IntersectionId;
use crate::error::{ConnectivityError, FetchError};
use crate::table::RawApproachTiming;
use chrono::{DateTime, FixedOffset};
use std::future::Future;

pub mod clock;
pub mod link;
pub mod sim;
pub mod timing;

/// A way onto the network.
pub trait ConnectivityProvider: Send + Sync {
    /// A short label for logs ("cellular", "wifi").
    fn name(&self) -> &'static str;

    /// Checks whether the link is usable right now, without changing it.
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Brings the link up.
    fn connect(&self) -> impl Future<Output = Result<(), ConnectivityError>> + Send;
}

/// A network time source.
pub trait TimeSyncService: Send + Sync {
    fn now(&self) -> impl Future<Output = Result<DateTime<FixedOffset>, FetchError>> + Send;
}

/// The remote service holding each intersection's timing table.
pub trait TimingFetchService: Send + Sync {
    fn fetch_timings(
        &self,
        intersection: IntersectionId,
    ) -> impl Future<Output = Result<Vec<RawApproachTiming>, FetchError>> + Send;
}
