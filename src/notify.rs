// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Notification synthesis, the legacy ntf_q record queue, and the notify-buffer pool
//! OWNERS: @kernel-team
//! PUBLIC API: NotifyPool, NotifyRecord, build_notification, enqueue_or_replace
//! DEPENDS_ON: crate::proc_table::Process, crate::message, crate::bitset::Bitset, crate::err
//! INVARIANTS: a pool slot is free iff its bit is clear; ntf_q never holds two records with the same (source, kind)
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! This module keeps the bitmap path (`mini_alert`, consumed by `mini_receive`)
//! and the record-queue path (`mini_notify`) deliberately separate, per the
//! design-notes resolution in DESIGN.md: `mini_receive` only ever drains the
//! bitmap. The legacy `ntf_q` queue this module also maintains is populated by
//! `mini_notify` but intentionally never drained by `mini_receive` — mirroring
//! the original kernel, where that retrieval path sat behind a `TEMP_CODE`
//! compile switch that was off by default. Its replace-in-place bookkeeping is
//! still fully live and independently observable (see the round-trip law test
//! in ipc.rs), it simply isn't a second delivery path into a running receive.

use crate::bitset::Bitset;
use crate::err::{SyscallError, SyscallResult};
use crate::message::{notify_from, Message};
use crate::proc_table::Process;
use crate::types::ProcNr;

/// One legacy notification record: `{source, type, flags, arg, next}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotifyRecord {
    pub source: ProcNr,
    pub kind: u16,
    pub flags: u16,
    pub arg: u32,
    pub next: Option<usize>,
}

impl NotifyRecord {
    const EMPTY: Self = Self {
        source: ProcNr::ANY,
        kind: 0,
        flags: 0,
        arg: 0,
        next: None,
    };
}

/// The fixed-size free pool backing every slot's `ntf_q`, tracked by a single
/// bitmap (`notify_bitmap`/`alloc_bit`/`free_bit` in the source).
#[derive(Clone, Debug)]
pub struct NotifyPool {
    records: Vec<NotifyRecord>,
    allocated: Bitset,
}

impl NotifyPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: vec![NotifyRecord::EMPTY; capacity],
            allocated: Bitset::new(capacity),
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &NotifyRecord {
        &self.records[idx]
    }

    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> &mut NotifyRecord {
        &mut self.records[idx]
    }

    fn alloc(&mut self) -> Option<usize> {
        self.allocated.alloc_first_clear()
    }

    fn free(&mut self, idx: usize) {
        self.records[idx] = NotifyRecord::EMPTY;
        self.allocated.clear(idx);
    }
}

/// `mini_notify`'s enqueue step: replace an existing `(source, kind)` entry in
/// place, or allocate and append a fresh one. Fails `ENOSPC` only when no entry
/// already matches and the pool is exhausted.
pub fn enqueue_or_replace(
    pool: &mut NotifyPool,
    head: &mut Option<usize>,
    source: ProcNr,
    kind: u16,
    flags: u16,
    arg: u32,
) -> SyscallResult<()> {
    let mut cursor = *head;
    while let Some(idx) = cursor {
        let rec = pool.get(idx);
        if rec.source == source && rec.kind == kind {
            let rec = pool.get_mut(idx);
            rec.flags = flags;
            rec.arg = arg;
            return Ok(());
        }
        cursor = rec.next;
    }

    let idx = pool.alloc().ok_or(SyscallError::NoSpace)?;
    {
        let rec = pool.get_mut(idx);
        rec.source = source;
        rec.kind = kind;
        rec.flags = flags;
        rec.arg = arg;
        rec.next = None;
    }

    match head {
        None => *head = Some(idx),
        Some(first) => {
            let mut cursor = *first;
            loop {
                match pool.get(cursor).next {
                    Some(next) => cursor = next,
                    None => {
                        pool.get_mut(cursor).next = Some(idx);
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Frees every record reachable from `head`, used when a slot is torn down by
/// the external process manager (out of scope here, but exposed for callers
/// that need to release pool capacity without reimplementing the traversal).
pub fn free_chain(pool: &mut NotifyPool, head: &mut Option<usize>) {
    let mut cursor = head.take();
    while let Some(idx) = cursor {
        cursor = pool.get(idx).next;
        pool.free(idx);
    }
}

/// `BuildMess`: synthesizes a notification message from `src` destined for
/// `dst`, applying the HARDWARE/SYSTEM pending-argument capture-and-clear rule.
/// Unifies the duplicate HARDWARE-handling branches the source takes in
/// `mini_alert`, `mini_notify`, and `mini_receive`'s bitmap pickup (§9 open
/// question) into this single routine.
pub fn build_notification(src: ProcNr, dst: &mut Process, uptime: u64) -> Message {
    let mut arg = 0u32;
    if src == ProcNr::HARDWARE {
        arg = dst.priv_block.int_pending;
        dst.priv_block.int_pending = 0;
    } else if src == ProcNr::SYSTEM {
        arg = dst.priv_block.sig_pending;
        dst.priv_block.sig_pending = 0;
    }

    Message {
        m_source: src,
        m_type: notify_from(src),
        notify_arg: arg,
        notify_flags: 0,
        notify_timestamp: uptime,
        payload: [0; crate::message::MESS_SIZE],
    }
}
