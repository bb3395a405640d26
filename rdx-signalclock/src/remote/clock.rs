//! Time of day: the world-time HTTP adapter and the software real-time clock
//! it seeds at startup.

use super::TimeSyncService;
use crate::error::FetchError;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct WorldTimeResponse {
    datetime: String,
}

/// Parses the `datetime` field of a world-time response.
pub fn parse_world_time(body: &str) -> Result<DateTime<FixedOffset>, FetchError> {
    let response: WorldTimeResponse = serde_json::from_str(body)?;
    DateTime::parse_from_rfc3339(&response.datetime)
        .map_err(|_| FetchError::Timestamp(response.datetime))
}

/// Fetches the current time for a timezone from a worldtimeapi-style service.
#[derive(Debug, Clone)]
pub struct WorldTimeService {
    client: reqwest::Client,
    url: String,
}

impl WorldTimeService {
    /// `base_url` is joined with the IANA name of `timezone`.
    pub fn new(base_url: &str, timezone: Tz, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/{}", base_url.trim_end_matches('/'), timezone.name()),
        })
    }
}

impl TimeSyncService for WorldTimeService {
    async fn now(&self) -> Result<DateTime<FixedOffset>, FetchError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        parse_world_time(&response.text().await?)
    }
}

/// A software real-time clock: the host clock corrected by the offset
/// measured against network time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rtc {
    offset: TimeDelta,
}

impl Rtc {
    /// Sets the clock so that it reads `network_now` at this instant.
    pub fn set(&mut self, network_now: DateTime<FixedOffset>) {
        self.offset = network_now.with_timezone(&Utc) - Utc::now();
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }

    pub fn now_in(&self, timezone: Tz) -> DateTime<Tz> {
        self.now().with_timezone(&timezone)
    }

    pub fn offset(&self) -> TimeDelta {
        self.offset
    }
}
