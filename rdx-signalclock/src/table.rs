//! Phase tables: what the executor replays.
//!
//! A [`Configuration`] is an ordered, non-empty list of [`ApproachTable`]s,
//! each holding exactly three [`Phase`]s. Approach order defines execution
//! order. Configurations are immutable once built; the only way to change the
//! running schedule is to build a new one and publish it to the
//! [`ConfigStore`](crate::store::ConfigStore).

use crate::common::ApproachId;
use crate::error::MalformedConfigError;
use crate::signal::OutputVector;
use std::time::Duration;

/// The three steps of every approach, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    GreenEffective,
    GreenFlash,
    Amber,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 3] = [
        PhaseKind::GreenEffective,
        PhaseKind::GreenFlash,
        PhaseKind::Amber,
    ];
}

/// One `(vector, duration)` step. The duration is a whole, positive number of
/// seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    kind: PhaseKind,
    vector: OutputVector,
    seconds: u32,
}

impl Phase {
    pub fn new(
        approach: ApproachId,
        kind: PhaseKind,
        vector: OutputVector,
        seconds: f64,
    ) -> Result<Self, MalformedConfigError> {
        let invalid = || MalformedConfigError::InvalidDuration {
            approach,
            phase: kind,
            value: seconds,
        };
        if !seconds.is_finite() || seconds < 1.0 || seconds.fract() != 0.0 {
            return Err(invalid());
        }
        if seconds > f64::from(u32::MAX) {
            return Err(invalid());
        }
        Ok(Self {
            kind,
            vector,
            seconds: seconds as u32,
        })
    }

    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    pub fn vector(&self) -> OutputVector {
        self.vector
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.seconds))
    }
}

/// The full three-phase sequence of one approach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproachTable {
    id: ApproachId,
    phases: [Phase; 3],
}

impl ApproachTable {
    pub fn id(&self) -> ApproachId {
        self.id
    }

    pub fn phases(&self) -> &[Phase; 3] {
        &self.phases
    }

    pub fn cycle_duration(&self) -> Duration {
        self.phases.iter().map(Phase::duration).sum()
    }
}

/// An ordered, non-empty list of approach tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    approaches: Vec<ApproachTable>,
}

impl Configuration {
    pub fn new(approaches: Vec<ApproachTable>) -> Result<Self, MalformedConfigError> {
        if approaches.is_empty() {
            return Err(MalformedConfigError::Empty);
        }
        Ok(Self { approaches })
    }

    pub fn approaches(&self) -> &[ApproachTable] {
        &self.approaches
    }

    /// Never zero; an empty record list fails to build.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.approaches.len()
    }

    /// The length of one master cycle: every phase of every approach.
    pub fn master_cycle_duration(&self) -> Duration {
        self.approaches.iter().map(ApproachTable::cycle_duration).sum()
    }
}

/// The three named durations of one remote record, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPhaseTimings {
    pub green_effective: f64,
    pub green_flash: f64,
    pub amber: f64,
}

impl RawPhaseTimings {
    fn seconds(&self, kind: PhaseKind) -> f64 {
        match kind {
            PhaseKind::GreenEffective => self.green_effective,
            PhaseKind::GreenFlash => self.green_flash,
            PhaseKind::Amber => self.amber,
        }
    }
}

/// One record as returned by the timing service, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawApproachTiming {
    pub approach_id: ApproachId,
    pub timings: Option<RawPhaseTimings>,
}

impl RawApproachTiming {
    pub fn new(approach_id: u32, green_effective: f64, green_flash: f64, amber: f64) -> Self {
        Self {
            approach_id: ApproachId(approach_id),
            timings: Some(RawPhaseTimings {
                green_effective,
                green_flash,
                amber,
            }),
        }
    }
}

/// The fixed output vectors per approach slot. Record `i` of a timing
/// response is played with the vectors of slot `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    slots: Vec<[OutputVector; 3]>,
}

impl SlotTable {
    pub fn new(slots: Vec<[OutputVector; 3]>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[[OutputVector; 3]] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Validates remote records and pairs them with this table's vectors.
    pub fn build(&self, records: &[RawApproachTiming]) -> Result<Configuration, MalformedConfigError> {
        if records.len() > self.slots.len() {
            return Err(MalformedConfigError::TooManyApproaches {
                count: records.len(),
                slots: self.slots.len(),
            });
        }

        let approaches = records
            .iter()
            .zip(&self.slots)
            .map(|(record, vectors)| {
                let id = record.approach_id;
                let timings = record
                    .timings
                    .ok_or(MalformedConfigError::MissingTimings { approach: id })?;
                let [g, f, a] = PhaseKind::ALL;
                Ok(ApproachTable {
                    id,
                    phases: [
                        Phase::new(id, g, vectors[0], timings.seconds(g))?,
                        Phase::new(id, f, vectors[1], timings.seconds(f))?,
                        Phase::new(id, a, vectors[2], timings.seconds(a))?,
                    ],
                })
            })
            .collect::<Result<Vec<_>, MalformedConfigError>>()?;

        Configuration::new(approaches)
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        const REFERENCE: [[u8; 3]; 4] = [
            [0b01000, 0b11000, 0b00100],
            [0b01100, 0b11100, 0b00010],
            [0b01010, 0b11010, 0b00110],
            [0b01110, 0b11110, 0b00001],
        ];
        Self::new(
            REFERENCE
                .iter()
                .map(|slot| slot.map(OutputVector::from_bits))
                .collect(),
        )
    }
}
