// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process-table slots — blocking state, privilege block, and intrusive queue links
//! OWNERS: @kernel-team
//! PUBLIC API: Process, ProcessTable, RtsFlags, PrivFlags, CallMask, Priv
//! DEPENDS_ON: crate::types, crate::message, crate::bitset
//! INVARIANTS: a slot is runnable iff rts_flags.is_empty(); q_link/nextready each describe membership in at most one intrusive list
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use crate::bitset::Bitset;
use crate::message::{Function, Message};
use crate::types::{Priority, ProcNr, SysId};

bitflags::bitflags! {
    /// Per-slot blocking state. A slot is runnable iff this is empty.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RtsFlags: u8 {
        const SENDING = 0b0000_0001;
        const RECEIVING = 0b0000_0010;
    }
}

bitflags::bitflags! {
    /// Privilege-class policy flags affecting scheduler and accounting behavior.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PrivFlags: u8 {
        /// Charge `bill_ptr` to this slot when it is elected to run.
        const BILLABLE = 0b0000_0001;
        /// Eligible for quantum-exhaustion demotion in `sched`.
        const PREEMPTIBLE = 0b0000_0010;
        /// `ready()` pushes this slot at the head of its queue instead of the tail.
        const RDY_Q_HEAD = 0b0000_0100;
        /// Kernel task: `unready()` verifies its stack guard before unlinking it.
        const KERNEL_TASK = 0b0000_1000;
    }
}

bitflags::bitflags! {
    /// Which system-call functions a slot is permitted to invoke.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CallMask: u8 {
        const SEND = 0b0000_0001;
        const RECEIVE = 0b0000_0010;
        const SENDREC = 0b0000_0100;
        const NOTIFY = 0b0000_1000;
        const ALERT = 0b0001_0000;
        const ECHO = 0b0010_0000;
    }
}

impl CallMask {
    /// Every function a slot may invoke, the default for ordinary processes.
    pub const ALL: Self = Self::from_bits_truncate(0b0011_1111);

    pub fn allows(self, function: Function) -> bool {
        self.contains(Self::for_function(function))
    }

    pub const fn for_function(function: Function) -> Self {
        match function {
            Function::Send => Self::SEND,
            Function::Receive => Self::RECEIVE,
            Function::SendRec => Self::SENDREC,
            Function::Notify => Self::NOTIFY,
            Function::Alert => Self::ALERT,
            Function::Echo => Self::ECHO,
        }
    }
}

/// Stack guard sentinel; `unready()` panics if a kernel task's guard word no
/// longer matches this, indicating a stack overrun.
pub const STACK_GUARD: u32 = 0xDEAD_C0DE;

/// Privilege block: permissions and asynchronous-notification bookkeeping.
#[derive(Clone, Debug)]
pub struct Priv {
    pub call_mask: CallMask,
    pub send_mask: Bitset,
    pub flags: PrivFlags,
    pub id: SysId,
    pub notify_pending: Bitset,
    pub int_pending: u32,
    pub sig_pending: u32,
    pub stack_guard: Option<u32>,
}

impl Priv {
    pub fn new(id: SysId, nr_procs: usize, nr_sys_procs: usize) -> Self {
        Self {
            call_mask: CallMask::ALL,
            send_mask: Bitset::new(nr_procs),
            flags: PrivFlags::empty(),
            id,
            notify_pending: Bitset::new(nr_sys_procs),
            int_pending: 0,
            sig_pending: 0,
            stack_guard: None,
        }
    }
}

/// One process-table slot.
#[derive(Clone, Debug)]
pub struct Process {
    pub p_nr: ProcNr,
    pub rts_flags: RtsFlags,
    pub getfrom: ProcNr,
    pub sendto: ProcNr,
    /// Outgoing message while `SENDING`: the payload a blocked sender is
    /// waiting to have copied out of. Untouched by this slot's own
    /// `mini_receive` calls (so a SENDREC that blocks on its send half keeps
    /// the original payload available to whichever process later drains it
    /// from `caller_q`).
    pub send_buf: Option<Message>,
    /// Landed message once a rendezvous, notification, or queued sender has
    /// been delivered into this slot. `None` while still blocked waiting.
    pub recv_buf: Option<Message>,
    /// Whether the external process manager still considers this slot live.
    /// Process creation/teardown are out of scope (`mini_send` only reads
    /// this to decide `EDEADDST`); defaults to `true`.
    pub alive: bool,
    /// Head of the list of other slots blocked sending to this one.
    pub caller_q_head: Option<ProcNr>,
    /// Next-pointer for membership in exactly one `caller_q`.
    pub q_link: Option<ProcNr>,
    /// Head of this slot's legacy notification-record queue (see notify module).
    pub ntf_q_head: Option<usize>,
    pub priority: Priority,
    pub max_priority: Priority,
    pub full_quantums: u16,
    pub sched_ticks: u16,
    pub quantum_size: u16,
    /// Next-pointer for membership in a ready queue.
    pub nextready: Option<ProcNr>,
    pub priv_block: Priv,
}

impl Process {
    pub fn new(p_nr: ProcNr, priority: Priority, quantum_size: u16, priv_block: Priv) -> Self {
        Self {
            p_nr,
            rts_flags: RtsFlags::empty(),
            getfrom: ProcNr::ANY,
            sendto: ProcNr::ANY,
            send_buf: None,
            recv_buf: None,
            alive: true,
            caller_q_head: None,
            q_link: None,
            ntf_q_head: None,
            priority,
            max_priority: priority,
            full_quantums: quantum_size.max(1),
            sched_ticks: quantum_size,
            quantum_size,
            nextready: None,
            priv_block,
        }
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.rts_flags.is_empty()
    }
}

/// The fixed-size in-place array of process control blocks: the universal
/// address space for every `ProcNr` reference in this crate.
#[derive(Clone, Debug)]
pub struct ProcessTable {
    slots: Vec<Process>,
}

impl ProcessTable {
    pub fn new(slots: Vec<Process>) -> Self {
        Self { slots }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn get(&self, p_nr: ProcNr) -> &Process {
        &self.slots[p_nr.index().expect("real process number required")]
    }

    #[inline]
    pub fn get_mut(&mut self, p_nr: ProcNr) -> &mut Process {
        &mut self.slots[p_nr.index().expect("real process number required")]
    }

    #[inline]
    pub fn as_slice(&self) -> &[Process] {
        &self.slots
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Process] {
        &mut self.slots
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter()
    }
}
