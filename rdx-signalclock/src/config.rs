//! Defines all configuration structures for the controller.
//!
//! These structs are deserialized with `serde` from an optional TOML file
//! layered under `SIGNALCLOCK__*` environment variables, so a deployment can
//! describe its endpoints, pin assignment and timing policy without code
//! changes.

use crate::common::{IntersectionId, PinId};
use crate::executor::DisabledOutputPolicy;
use crate::pins::OutputPins;
use crate::signal::OutputVector;
use crate::table::SlotTable;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The top-level configuration for the `SignalController`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// The intersection whose table is requested from the timing service.
    #[serde(default = "default_intersection")]
    pub intersection: IntersectionId,

    #[serde(default)]
    pub refresh: RefreshConfig,

    pub timing_service: TimingServiceConfig,

    #[serde(default)]
    pub time_service: TimeServiceConfig,

    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub pins: PinConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Output vectors per approach slot. Record `i` of a timing response is
    /// played with slot `i`.
    #[serde(default = "default_slots")]
    pub slots: Vec<[OutputVector; 3]>,
}

/// How often the background refresher asks for a new table.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingServiceConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeServiceConfig {
    #[serde(default = "default_time_service_url")]
    pub url: String,
    /// IANA zone name (e.g., "America/Mexico_City").
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Serial device of the cellular modem. Without it Wi-Fi is used directly.
    #[serde(default)]
    pub modem_device: Option<PathBuf>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_response_wait_ms")]
    pub response_wait_ms: u64,
    #[serde(default)]
    pub wifi: Option<WifiConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    #[serde(default = "default_wifi_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Which GPIO implementation drives the lines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PinBackend {
    Sysfs {
        #[serde(default = "default_sysfs_root")]
        root: PathBuf,
    },
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PinConfig {
    #[serde(default = "default_backend")]
    pub backend: PinBackend,
    #[serde(default)]
    pub outputs: OutputPins,
    #[serde(default = "default_selector")]
    pub selector: PinId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_gate_poll_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive agreeing samples needed to change state; 1 disables
    /// debouncing.
    #[serde(default = "default_debounce_samples")]
    pub debounce_samples: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub on_gate_disabled: DisabledOutputPolicy,
    #[serde(default)]
    pub inter_cycle_pause_ms: u64,
}

impl ControllerConfig {
    /// Loads settings from `path` (if it exists) and the environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("SIGNALCLOCK")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    /// Parses settings from TOML text alone.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    /// Rejects periods and counts that must never be zero.
    fn validated(self) -> Result<Self, ConfigError> {
        let nonzero = [
            ("refresh.interval_secs", self.refresh.interval_secs),
            ("gate.poll_interval_ms", self.gate.poll_interval_ms),
            ("gate.debounce_samples", u64::from(self.gate.debounce_samples)),
            ("link.baud_rate", u64::from(self.link.baud_rate)),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Message(format!("{key} must be greater than zero")));
            }
        }
        Ok(self)
    }

    pub fn slot_table(&self) -> SlotTable {
        SlotTable::new(self.slots.clone())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs)
    }

    pub fn timing_credentials(&self) -> Option<(String, String)> {
        let service = &self.timing_service;
        service
            .username
            .clone()
            .map(|user| (user, service.password.clone().unwrap_or_default()))
    }
}

impl GateConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// --- Default value functions for serde ---

fn default_intersection() -> IntersectionId {
    IntersectionId(1)
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_time_service_url() -> String {
    "https://worldtimeapi.org/api/timezone".to_string()
}

fn default_timezone() -> Tz {
    Tz::America__Mexico_City
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_response_wait_ms() -> u64 {
    3000
}

fn default_wifi_timeout_secs() -> u64 {
    60
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

fn default_backend() -> PinBackend {
    PinBackend::Sysfs {
        root: default_sysfs_root(),
    }
}

fn default_selector() -> PinId {
    PinId(4)
}

fn default_gate_poll_ms() -> u64 {
    100
}

fn default_debounce_samples() -> u32 {
    3
}

fn default_slots() -> Vec<[OutputVector; 3]> {
    SlotTable::default().slots().to_vec()
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Default for TimeServiceConfig {
    fn default() -> Self {
        Self {
            url: default_time_service_url(),
            timezone: default_timezone(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            modem_device: None,
            baud_rate: default_baud_rate(),
            response_wait_ms: default_response_wait_ms(),
            wifi: None,
        }
    }
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            outputs: OutputPins::default(),
            selector: default_selector(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_gate_poll_ms(),
            debounce_samples: default_debounce_samples(),
        }
    }
}
