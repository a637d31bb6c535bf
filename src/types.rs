// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal newtypes for safer process-table indexing (debug-friendly, low overhead)
//! OWNERS: @kernel-team
//! PUBLIC API: ProcNr, Priority, SysId
//! DEPENDS_ON: nothing else in this crate
//! INVARIANTS: ProcNr is always a valid index or one of the reserved sentinels; Priority is bounded by NR_SCHED_QUEUES
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! ## Newtype Rationale (TASK-0011B)
//!
//! Rust newtypes provide **zero-cost type safety** at compile time:
//! - Prevent accidental mixing of process numbers, priorities, and privilege ids
//! - Make the `ANY` / `HARDWARE` / `SYSTEM` sentinels impossible to confuse with real slots
//! - Replace the source's pointer-pointer list traversal with typed arena indices (§9)

use std::fmt;

/// A process-table slot index, or one of the reserved pseudo-process sentinels.
///
/// Mirrors the source's `p_nr`/`src_dst` convention: small non-negative integers
/// index real slots, while a handful of negative values are pseudo-sources used
/// only inside notification delivery.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcNr(i16);

impl ProcNr {
    /// Wildcard: "any source is acceptable" (receive only) / "no specific destination".
    pub const ANY: Self = Self(-1);
    /// Pseudo-source for interrupt-originated notifications.
    pub const HARDWARE: Self = Self(-2);
    /// Pseudo-source for kernel-internal (signal) notifications.
    pub const SYSTEM: Self = Self(-3);

    #[inline]
    pub const fn new(raw: i16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> i16 {
        self.0
    }

    /// A real, indexable process-table slot (not one of the pseudo sources).
    #[inline]
    pub const fn is_real(self) -> bool {
        self.0 >= 0
    }

    #[inline]
    pub fn index(self) -> Option<usize> {
        if self.is_real() {
            Some(self.0 as usize)
        } else {
            None
        }
    }
}

impl fmt::Display for ProcNr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ANY => write!(f, "ANY"),
            Self::HARDWARE => write!(f, "HARDWARE"),
            Self::SYSTEM => write!(f, "SYSTEM"),
            other => write!(f, "{}", other.0),
        }
    }
}

impl From<usize> for ProcNr {
    #[inline]
    fn from(raw: usize) -> Self {
        Self(raw as i16)
    }
}

/// Scheduling priority: smaller is more important. Bounded by `NR_SCHED_QUEUES - 1`
/// (the `IDLE_Q` index), enforced at construction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    #[inline]
    pub fn new(raw: u8, idle_q: u8) -> Self {
        debug_assert!(raw <= idle_q, "priority out of range of ready queues");
        Self(raw.min(idle_q))
    }

    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// Privilege id used to index the per-receiver pending-notification bitmap.
///
/// Distinct from `ProcNr`: several process numbers (kernel tasks) may share the
/// compact id space the bitmap is sized for, matching the source's `s_id`/`id_to_nr`
/// indirection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SysId(pub u16);

impl SysId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}
