//! Hybrid logical timestamps.
//!
//! A `Ts` packs wall-clock milliseconds and a logical counter into one
//! 64-bit value (46 physical bits, 18 logical bits), totally ordered and
//! monotone within a source.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of low bits holding the logical counter.
const LOGICAL_BITS: u32 = 18;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// 64-bit hybrid logical timestamp.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ts(u64);

impl Ts {
    pub const ZERO: Ts = Ts(0);
    pub const MAX: Ts = Ts(u64::MAX);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Pack wall-clock milliseconds and a logical counter.
    ///
    /// The logical component saturates at 18 bits; callers that tick faster
    /// than that within one millisecond must advance the physical part.
    pub fn compose(physical_ms: u64, logical: u64) -> Self {
        Self((physical_ms << LOGICAL_BITS) | (logical & LOGICAL_MASK))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn physical_ms(self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    pub fn logical(self) -> u64 {
        self.0 & LOGICAL_MASK
    }

    /// Smallest timestamp strictly greater than `self`.
    pub fn next(self) -> Ts {
        Ts(self.0.checked_add(1).expect("timestamp overflow"))
    }
}

impl fmt::Debug for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ts({}+{})", self.physical_ms(), self.logical())
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Ts {
    fn from(raw: u64) -> Self {
        Ts(raw)
    }
}

impl From<Ts> for u64 {
    fn from(ts: Ts) -> u64 {
        ts.0
    }
}
