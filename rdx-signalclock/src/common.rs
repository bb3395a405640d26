//! Contains common, primitive types used across the controller.
//!
//! This module defines the basic ID types used to identify approaches, pins
//! and intersections. Using distinct types keeps a pin number from ever being
//! passed where an approach id is expected.

use serde::Deserialize;
use std::fmt;

/// Identifies one approach (a "semaforo" record on the timing service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct ApproachId(pub u32);

/// A physical GPIO line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct PinId(pub u32);

/// The intersection whose timing table is fetched from the timing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct IntersectionId(pub u32);

impl fmt::Display for ApproachId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "approach#{}", self.0)
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpio{}", self.0)
    }
}

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
