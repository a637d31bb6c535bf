// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Overridable sizing and quantum-budget knobs for `Kernel::new`
//! OWNERS: @kernel-team
//! PUBLIC API: KernelConfig, KernelConfig::quantums_for
//! DEPENDS_ON: nothing else in this crate
//! INVARIANTS: idle_q == sched_queues - 1; quantum budgets are monotonically non-increasing as priority worsens
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! Mirrors this kernel's `determinism` module in spirit: rather than hard-coding
//! `NR_PROCS`/`NR_SCHED_QUEUES`/`NR_NOTIFY_BUFS` as preprocessor constants, every
//! knob that affects scheduling or pool-exhaustion behavior is a field on a small
//! config struct threaded through construction, so tests can exercise small tables
//! deterministically without recompiling.

/// Sizing and policy knobs for a [`crate::kernel::Kernel`] instance.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Number of process-table slots.
    pub nr_procs: usize,
    /// Number of scheduling priority levels, including `IDLE_Q`.
    pub sched_queues: u8,
    /// Size of the notification-record free pool (`NR_NOTIFY_BUFS`).
    pub nr_notify_bufs: usize,
    /// Per-priority-level full-quantum budget before demotion fires, indexed by
    /// priority (0 = highest). The last entry covers `IDLE_Q` and is never consumed
    /// since IDLE is conventionally not `PREEMPTIBLE`.
    pub quantums: Vec<u16>,
}

impl KernelConfig {
    /// `IDLE_Q`: the lowest (least important) scheduling priority.
    #[inline]
    pub fn idle_q(&self) -> u8 {
        self.sched_queues - 1
    }

    /// Size of the per-receiver pending-notification bitmap: one bit per real
    /// process plus two reserved ids for the `HARDWARE` and `SYSTEM` pseudo
    /// sources, which `mini_alert`/`mini_notify` can also set bits for.
    #[inline]
    pub fn nr_sys_ids(&self) -> usize {
        self.nr_procs + 2
    }

    /// `QUANTUMS(priority)` from the source: the full-quantum budget for a given
    /// priority level, saturating at the lowest configured entry for any priority
    /// beyond the table (defensive; priorities are always validated on construction).
    #[inline]
    pub fn quantums_for(&self, priority: u8) -> u16 {
        self.quantums
            .get(priority as usize)
            .copied()
            .unwrap_or_else(|| *self.quantums.last().unwrap_or(&1))
    }
}

impl Default for KernelConfig {
    /// A small, host-testable default: 16 slots, 4 priority levels, 32 notification
    /// records, and a quantum budget that halves every two levels down.
    fn default() -> Self {
        Self {
            nr_procs: 16,
            sched_queues: 4,
            nr_notify_bufs: 32,
            quantums: vec![8, 8, 4, 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_q_is_last_queue() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.idle_q(), 3);
    }

    #[test]
    fn nr_sys_ids_reserves_hardware_and_system() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.nr_sys_ids(), cfg.nr_procs + 2);
    }

    #[test]
    fn quantums_for_saturates_past_table() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.quantums_for(0), 8);
        assert_eq!(cfg.quantums_for(3), 1);
        assert_eq!(cfg.quantums_for(9), 1);
    }
}
