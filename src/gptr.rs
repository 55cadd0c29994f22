//! Global pointers: opaque handles to memory locations in the SPMD
//! collective.
//!
//! A [`GlobalPtr`] is the (unit, segment, offset) triple used as the key for
//! data dependencies. The tasking core only ever compares and hashes the
//! triple; dereferencing and offset translation are the concern of the
//! surrounding global-address-space layer, which hands the core absolute
//! offsets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one process (unit) of the SPMD collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u32);

impl UnitId {
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit {}", self.0)
    }
}

/// An opaque global pointer: the owning unit, a segment id and the absolute
/// offset within the unit's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalPtr {
    pub unit: UnitId,
    pub segment: u16,
    pub offset: u64,
}

impl GlobalPtr {
    pub fn new(unit: UnitId, segment: u16, offset: u64) -> Self {
        GlobalPtr {
            unit,
            segment,
            offset,
        }
    }
}

impl fmt::Display for GlobalPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}+{:#x}", self.unit.0, self.segment, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gptr_equality_is_the_full_triple() {
        let a = GlobalPtr::new(UnitId(0), 1, 64);
        let b = GlobalPtr::new(UnitId(0), 1, 64);
        let c = GlobalPtr::new(UnitId(0), 2, 64);
        let d = GlobalPtr::new(UnitId(1), 1, 64);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
