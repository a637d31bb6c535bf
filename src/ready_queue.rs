// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed array of per-priority FIFO ready queues
//! OWNERS: @kernel-team
//! PUBLIC API: ReadyQueues
//! DEPENDS_ON: crate::proc_table::Process, crate::types::Priority
//! INVARIANTS: a slot is linked into rdy_head[q] iff rts_flags is empty and priority == q (enforced by callers in sched.rs)
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! Holds just the queue data and its low-level list surgery; the policy that
//! decides *when* to call these (ready/unready/sched/pick_proc) lives in
//! `sched.rs` since it also needs the kernel's `proc_ptr`/`next_ptr`/`bill_ptr`.

use crate::proc_table::Process;
use crate::types::{Priority, ProcNr};

#[derive(Clone, Debug)]
pub struct ReadyQueues {
    head: Vec<Option<ProcNr>>,
    tail: Vec<Option<ProcNr>>,
}

impl ReadyQueues {
    pub fn new(levels: u8) -> Self {
        let n = levels as usize;
        Self {
            head: vec![None; n],
            tail: vec![None; n],
        }
    }

    #[inline]
    pub fn head_at(&self, q: Priority) -> Option<ProcNr> {
        self.head[q.as_index()]
    }

    #[inline]
    pub fn tail_at(&self, q: Priority) -> Option<ProcNr> {
        self.tail[q.as_index()]
    }

    /// Push at the tail of queue `q` (the default, fairer-to-I/O-bound policy).
    pub fn push_tail(&mut self, procs: &mut [Process], q: Priority, rp: ProcNr) {
        let idx = q.as_index();
        match self.tail[idx] {
            None => {
                self.head[idx] = Some(rp);
                self.tail[idx] = Some(rp);
                procs[rp.index().unwrap()].nextready = None;
            }
            Some(tail) => {
                procs[tail.index().unwrap()].nextready = Some(rp);
                self.tail[idx] = Some(rp);
                procs[rp.index().unwrap()].nextready = None;
            }
        }
    }

    /// Push at the head of queue `q` (the `RDY_Q_HEAD` fairness boost).
    pub fn push_head(&mut self, procs: &mut [Process], q: Priority, rp: ProcNr) {
        let idx = q.as_index();
        match self.head[idx] {
            None => {
                self.head[idx] = Some(rp);
                self.tail[idx] = Some(rp);
                procs[rp.index().unwrap()].nextready = None;
            }
            Some(old_head) => {
                procs[rp.index().unwrap()].nextready = Some(old_head);
                self.head[idx] = Some(rp);
            }
        }
    }

    /// Unlinks `rp` from queue `q` if present. Returns whether it was found.
    pub fn remove(&mut self, procs: &mut [Process], q: Priority, rp: ProcNr) -> bool {
        let idx = q.as_index();
        let mut prev: Option<ProcNr> = None;
        let mut cursor = self.head[idx];

        while let Some(node) = cursor {
            let next = procs[node.index().unwrap()].nextready;
            if node == rp {
                match prev {
                    None => self.head[idx] = next,
                    Some(p) => procs[p.index().unwrap()].nextready = next,
                }
                if self.tail[idx] == Some(node) {
                    self.tail[idx] = prev;
                }
                procs[node.index().unwrap()].nextready = None;
                return true;
            }
            prev = cursor;
            cursor = next;
        }
        false
    }

    /// Rotates queue `q`: moves the current head to the tail (`sched`'s
    /// quantum-expiry rotation). No-op on an empty or singleton queue.
    pub fn rotate(&mut self, procs: &mut [Process], q: Priority) {
        let idx = q.as_index();
        let Some(old_head) = self.head[idx] else { return };
        let new_head = procs[old_head.index().unwrap()].nextready;
        if new_head.is_none() {
            return; // singleton queue: rotating it is a no-op
        }
        self.head[idx] = new_head;
        let old_tail = self.tail[idx].unwrap();
        procs[old_tail.index().unwrap()].nextready = Some(old_head);
        self.tail[idx] = Some(old_head);
        procs[old_head.index().unwrap()].nextready = None;
    }

    /// Scans from the highest to the lowest priority for the first non-empty
    /// queue, returning its head (`pick_proc`'s selection).
    pub fn pick(&self) -> Option<ProcNr> {
        self.head.iter().find_map(|&h| h)
    }
}
