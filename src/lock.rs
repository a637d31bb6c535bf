// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Reentrancy-counter critical section standing in for "interrupts disabled"
//! OWNERS: @kernel-team
//! PUBLIC API: Reentrancy, LockSite, sites::*
//! DEPENDS_ON: nothing else in this crate
//! INVARIANTS: depth >= 0 means the kernel is already locked (entered via trap/interrupt or a prior lock_*); depth == -1 means unlocked task context
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! The source's `k_reenter` is an ad-hoc recursion guard checked by every
//! `lock_*` gateway. Per the design-notes resolution (§9), this crate models
//! it as an explicit reentrancy counter rather than real interrupt-disable
//! instructions — appropriate for a host-testable core that never runs under
//! real interrupts. `Kernel`'s `lock_*` methods bracket each call to the
//! underlying primitive with `Reentrancy::enter`/`exit`, exactly mirroring the
//! source's `lock(tag, name)` / `unlock(tag)` pairing.

/// Identifies a `lock_*` call site for diagnostics, mirroring the source's
/// per-call-site numeric tag plus name string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockSite {
    pub tag: u8,
    pub name: &'static str,
}

pub mod sites {
    use super::LockSite;

    pub const NOTIFY: LockSite = LockSite { tag: 0, name: "notify" };
    pub const ALERT: LockSite = LockSite { tag: 1, name: "alert" };
    pub const SEND: LockSite = LockSite { tag: 2, name: "send" };
    pub const READY: LockSite = LockSite { tag: 3, name: "ready" };
    pub const UNREADY: LockSite = LockSite { tag: 4, name: "unready" };
    pub const SCHED: LockSite = LockSite { tag: 5, name: "sched" };
}

/// Reentrancy depth counter. Negative means "not inside the kernel"; the
/// source's convention of `k_reenter >= 0` meaning "already locked" is
/// preserved verbatim by `is_already_locked`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reentrancy {
    depth: i32,
}

impl Default for Reentrancy {
    fn default() -> Self {
        Self { depth: -1 }
    }
}

impl Reentrancy {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn depth(&self) -> i32 {
        self.depth
    }

    #[inline]
    pub fn is_already_locked(&self) -> bool {
        self.depth >= 0
    }

    /// Enters one level of the critical section.
    pub fn enter(&mut self) {
        self.depth += 1;
    }

    /// Leaves one level of the critical section.
    pub fn exit(&mut self) {
        debug_assert!(self.depth >= 0, "unbalanced lock/unlock");
        self.depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unlocked() {
        let r = Reentrancy::new();
        assert!(!r.is_already_locked());
        assert_eq!(r.depth(), -1);
    }

    #[test]
    fn enter_exit_is_balanced() {
        let mut r = Reentrancy::new();
        r.enter();
        assert!(r.is_already_locked());
        assert_eq!(r.depth(), 0);
        r.enter();
        assert_eq!(r.depth(), 1);
        r.exit();
        assert_eq!(r.depth(), 0);
        r.exit();
        assert!(!r.is_already_locked());
    }
}
