//! Digital I/O for the signal heads and the selector input.
//!
//! The executor is the only writer of the output lines; it goes through an
//! `OutputBank`, which maps each `Signal` of an `OutputVector` onto its
//! configured line. Everything device-specific sits behind the two small
//! traits below so the core runs the same against sysfs GPIO on the cabinet
//! controller and against `SimulatedPins` on the bench.

use crate::common::PinId;
use crate::error::PinError;
use crate::signal::{OutputVector, Signal};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, trace};

/// A set of lines that can be driven high or low.
pub trait DigitalOutput: Send {
    fn set(&mut self, pin: PinId, level: bool) -> Result<(), PinError>;
}

/// A set of lines that can be sampled.
pub trait DigitalInput: Send {
    fn get(&self, pin: PinId) -> Result<bool, PinError>;
}

/// Line assignment of the five outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct OutputPins {
    pub red: PinId,
    pub amber: PinId,
    pub green_flash: PinId,
    pub green: PinId,
    pub auxiliary: PinId,
}

impl OutputPins {
    pub fn pin(&self, signal: Signal) -> PinId {
        match signal {
            Signal::Red => self.red,
            Signal::Amber => self.amber,
            Signal::GreenFlash => self.green_flash,
            Signal::Green => self.green,
            Signal::Auxiliary => self.auxiliary,
        }
    }
}

impl Default for OutputPins {
    fn default() -> Self {
        Self {
            red: PinId(25),
            amber: PinId(26),
            green_flash: PinId(27),
            green: PinId(13),
            auxiliary: PinId(32),
        }
    }
}

// Write order on the lines; auxiliary first, red last.
const DRIVE_ORDER: [Signal; 5] = [
    Signal::Auxiliary,
    Signal::Green,
    Signal::GreenFlash,
    Signal::Amber,
    Signal::Red,
];

/// Drives whole output vectors onto the configured lines.
pub struct OutputBank<O> {
    output: O,
    pins: OutputPins,
    last: Option<OutputVector>,
}

impl<O: DigitalOutput> OutputBank<O> {
    pub fn new(output: O, pins: OutputPins) -> Self {
        Self {
            output,
            pins,
            last: None,
        }
    }

    /// Writes every line of `vector`. A failing line is logged and the rest
    /// are still written. Returns `true` if every write succeeded.
    pub fn drive(&mut self, vector: OutputVector) -> bool {
        let mut all_ok = true;
        for signal in DRIVE_ORDER {
            let pin = self.pins.pin(signal);
            if let Err(e) = self.output.set(pin, vector.is_set(signal)) {
                error!("Failed to drive {:?} on {}: {}", signal, pin, e);
                all_ok = false;
            }
        }
        trace!("Drove {}", vector);
        self.last = Some(vector);
        all_ok
    }

    /// The vector most recently driven, if any.
    pub fn last_driven(&self) -> Option<OutputVector> {
        self.last
    }
}

/// Line direction used when exporting a sysfs GPIO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// GPIO through the Linux sysfs interface (`/sys/class/gpio`).
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Exports `pin` if needed and sets its direction.
    pub fn export(&self, pin: PinId, direction: Direction) -> Result<(), PinError> {
        let line = self.line_dir(pin);
        if !line.exists() {
            write_line(pin, &self.root.join("export"), &pin.0.to_string())?;
        }
        let dir = match direction {
            Direction::In => "in",
            Direction::Out => "out",
        };
        write_line(pin, &line.join("direction"), dir)
    }

    fn line_dir(&self, pin: PinId) -> PathBuf {
        self.root.join(format!("gpio{}", pin.0))
    }
}

fn write_line(pin: PinId, path: &Path, value: &str) -> Result<(), PinError> {
    fs::write(path, value).map_err(|source| PinError::Io { pin, source })
}

impl DigitalOutput for SysfsGpio {
    fn set(&mut self, pin: PinId, level: bool) -> Result<(), PinError> {
        write_line(pin, &self.line_dir(pin).join("value"), if level { "1" } else { "0" })
    }
}

impl DigitalInput for SysfsGpio {
    fn get(&self, pin: PinId) -> Result<bool, PinError> {
        let raw = fs::read_to_string(self.line_dir(pin).join("value"))
            .map_err(|source| PinError::Io { pin, source })?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(PinError::UnexpectedValue {
                pin,
                value: other.to_string(),
            }),
        }
    }
}

/// In-memory lines for the bench shell and tests. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPins {
    levels: Arc<Mutex<BTreeMap<PinId, bool>>>,
}

impl SimulatedPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level of `pin`; unset lines read low.
    pub fn level(&self, pin: PinId) -> bool {
        self.levels
            .lock()
            .map(|levels| levels.get(&pin).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    /// Forces a line, e.g. to flip the simulated selector switch.
    pub fn drive_input(&self, pin: PinId, level: bool) {
        if let Ok(mut levels) = self.levels.lock() {
            levels.insert(pin, level);
        }
    }

    /// Reassembles the vector currently present on `pins`.
    pub fn vector(&self, pins: &OutputPins) -> OutputVector {
        Signal::ALL
            .iter()
            .fold(OutputVector::ALL_OFF, |v, &s| v.with(s, self.level(pins.pin(s))))
    }

    /// Every line that has been written, in pin order.
    pub fn snapshot(&self) -> Vec<(PinId, bool)> {
        self.levels
            .lock()
            .map(|levels| levels.iter().map(|(p, l)| (*p, *l)).collect())
            .unwrap_or_default()
    }
}

impl DigitalOutput for SimulatedPins {
    fn set(&mut self, pin: PinId, level: bool) -> Result<(), PinError> {
        let mut levels = self.levels.lock().map_err(|_| PinError::Poisoned)?;
        levels.insert(pin, level);
        Ok(())
    }
}

impl DigitalInput for SimulatedPins {
    fn get(&self, pin: PinId) -> Result<bool, PinError> {
        let levels = self.levels.lock().map_err(|_| PinError::Poisoned)?;
        Ok(levels.get(&pin).copied().unwrap_or(false))
    }
}
