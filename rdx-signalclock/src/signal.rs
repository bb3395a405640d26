//! The five physical signal outputs and the vector of levels driven on them.
//!
//! An [`OutputVector`] is only ever replayed from a phase table; the executor
//! never computes one. The textual form is five `0`/`1` characters, one per
//! [`Signal`] in declaration order.

use crate::error::MalformedConfigError;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

/// One of the five outputs of a signal head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Red,
    Amber,
    GreenFlash,
    Green,
    Auxiliary,
}

impl Signal {
    /// Every output, in the order used by the textual vector form.
    pub const ALL: [Signal; 5] = [
        Signal::Red,
        Signal::Amber,
        Signal::GreenFlash,
        Signal::Green,
        Signal::Auxiliary,
    ];

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// The levels asserted on all five outputs at one instant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutputVector {
    bits: u8,
}

impl OutputVector {
    /// Every output off. This is the safe state forced on shutdown.
    pub const ALL_OFF: OutputVector = OutputVector { bits: 0 };

    const MASK: u8 = 0b1_1111;

    /// Builds a vector from a bitmask where bit `n` is `Signal::ALL[n]`.
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            bits: bits & Self::MASK,
        }
    }

    pub const fn bits(self) -> u8 {
        self.bits
    }

    pub fn with(self, signal: Signal, on: bool) -> Self {
        let bits = if on {
            self.bits | signal.bit()
        } else {
            self.bits & !signal.bit()
        };
        Self { bits }
    }

    pub fn is_set(self, signal: Signal) -> bool {
        self.bits & signal.bit() != 0
    }

    /// Pairs every output with its level, in `Signal::ALL` order.
    pub fn levels(self) -> [(Signal, bool); 5] {
        Signal::ALL.map(|signal| (signal, self.is_set(signal)))
    }
}

impl FromStr for OutputVector {
    type Err = MalformedConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.len() != Signal::ALL.len() {
            return Err(MalformedConfigError::InvalidVector(s.to_string()));
        }
        text.chars()
            .zip(Signal::ALL)
            .try_fold(OutputVector::ALL_OFF, |vector, (c, signal)| match c {
                '0' => Ok(vector),
                '1' => Ok(vector.with(signal, true)),
                _ => Err(MalformedConfigError::InvalidVector(s.to_string())),
            })
    }
}

impl fmt::Display for OutputVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for signal in Signal::ALL {
            f.write_str(if self.is_set(signal) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for OutputVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputVector({})", self)
    }
}

impl<'de> Deserialize<'de> for OutputVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_characters_map_to_signals_in_order() {
        let v: OutputVector = "00010".parse().unwrap();
        assert!(v.is_set(Signal::Green));
        assert!(!v.is_set(Signal::Red));
        assert!(!v.is_set(Signal::Auxiliary));

        let v: OutputVector = "10001".parse().unwrap();
        assert!(v.is_set(Signal::Red));
        assert!(v.is_set(Signal::Auxiliary));
        assert!(!v.is_set(Signal::Amber));
        assert_eq!(v.to_string(), "10001");
    }

    #[test]
    fn rejects_bad_literals() {
        for bad in ["", "0001", "000100", "0002x", "abcde"] {
            assert_eq!(
                bad.parse::<OutputVector>(),
                Err(MalformedConfigError::InvalidVector(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn from_bits_ignores_bits_above_the_five_outputs() {
        assert_eq!(OutputVector::from_bits(0xFF).bits(), 0b1_1111);
        assert_eq!(OutputVector::from_bits(0xE0), OutputVector::ALL_OFF);
    }
}
