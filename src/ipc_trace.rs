// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Low-noise, bounded IPC trace ring for bring-up triage
//! OWNERS: @kernel-ipc-team
//! STATUS: Experimental (feature-gated)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Smoke-tested only
//!
//! This module is intentionally tiny: it records a fixed number of IPC events
//! in memory and emits nothing until explicitly dumped. Only compiled in when
//! the `ipc_trace_ring` feature is enabled, exactly as in the lineage this
//! crate is drawn from — a always-on ring would itself perturb the scheduling
//! behavior this crate exists to model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::err::SyscallError;
use crate::types::ProcNr;

#[derive(Clone, Copy, Debug)]
pub struct TraceEvent {
    pub seq: u32,
    pub kind: u8,
    pub status: u8,
    pub src: i16,
    pub dst: i16,
    pub m_type: u16,
}

impl TraceEvent {
    pub const fn empty() -> Self {
        Self {
            seq: 0,
            kind: 0,
            status: 0,
            src: 0,
            dst: 0,
            m_type: 0,
        }
    }
}

const KIND_SEND: u8 = 1;
const KIND_RECEIVE: u8 = 2;
const KIND_SENDREC: u8 = 3;
const KIND_NOTIFY: u8 = 4;
const KIND_ALERT: u8 = 5;
const KIND_ECHO: u8 = 6;

// Power-of-two ring size for cheap masking.
const RING_SIZE: usize = 2048;
const RING_MASK: usize = RING_SIZE - 1;
const DUMP_COUNT: usize = 256;

static WRITE_SEQ: AtomicUsize = AtomicUsize::new(0);

struct Ring([TraceEvent; RING_SIZE]);
// Safety valve for the host build: a real kernel would keep this per-CPU and
// lock-free under `CriticalSection`; here a plain mutex is plenty since this
// crate never runs under real concurrency (see determinism.rs).
static RING: Mutex<Ring> = Mutex::new(Ring([TraceEvent::empty(); RING_SIZE]));

#[inline]
fn err_code(err: Option<SyscallError>) -> u8 {
    match err {
        None => 0,
        Some(e) => (-e.code()) as u8,
    }
}

#[inline]
fn push(mut ev: TraceEvent) {
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    ev.seq = seq as u32;
    let idx = seq & RING_MASK;
    RING.lock().unwrap().0[idx] = ev;
}

pub fn record_send(src: ProcNr, dst: ProcNr, m_type: u16, err: Option<SyscallError>) {
    push(TraceEvent {
        kind: KIND_SEND,
        status: err_code(err),
        src: src.raw(),
        dst: dst.raw(),
        m_type,
        ..TraceEvent::empty()
    });
}

pub fn record_receive(caller: ProcNr, src: ProcNr, m_type: u16, err: Option<SyscallError>) {
    push(TraceEvent {
        kind: KIND_RECEIVE,
        status: err_code(err),
        src: src.raw(),
        dst: caller.raw(),
        m_type,
        ..TraceEvent::empty()
    });
}

pub fn record_sendrec(src: ProcNr, dst: ProcNr, m_type: u16, err: Option<SyscallError>) {
    push(TraceEvent {
        kind: KIND_SENDREC,
        status: err_code(err),
        src: src.raw(),
        dst: dst.raw(),
        m_type,
        ..TraceEvent::empty()
    });
}

pub fn record_notify(src: ProcNr, dst: ProcNr, err: Option<SyscallError>) {
    push(TraceEvent {
        kind: KIND_NOTIFY,
        status: err_code(err),
        src: src.raw(),
        dst: dst.raw(),
        m_type: 0,
        ..TraceEvent::empty()
    });
}

pub fn record_alert(src: ProcNr, dst: ProcNr, err: Option<SyscallError>) {
    push(TraceEvent {
        kind: KIND_ALERT,
        status: err_code(err),
        src: src.raw(),
        dst: dst.raw(),
        m_type: 0,
        ..TraceEvent::empty()
    });
}

pub fn record_echo(caller: ProcNr, err: Option<SyscallError>) {
    push(TraceEvent {
        kind: KIND_ECHO,
        status: err_code(err),
        src: caller.raw(),
        dst: caller.raw(),
        m_type: 0,
        ..TraceEvent::empty()
    });
}

/// Renders the last `DUMP_COUNT` events to stderr, for manual bring-up triage.
pub fn dump(tag: &str) {
    eprintln!("IPC-TRACE dump tag={}", tag);
    let end = WRITE_SEQ.load(Ordering::Relaxed);
    let start = end.saturating_sub(DUMP_COUNT);
    let ring = RING.lock().unwrap();
    for seq in start..end {
        let idx = seq & RING_MASK;
        let ev = ring.0[idx];
        if ev.seq != seq as u32 {
            continue;
        }
        let kind = match ev.kind {
            KIND_SEND => "send",
            KIND_RECEIVE => "receive",
            KIND_SENDREC => "sendrec",
            KIND_NOTIFY => "notify",
            KIND_ALERT => "alert",
            KIND_ECHO => "echo",
            _ => "unk",
        };
        eprintln!(
            "IPC-TRACE {} seq=0x{:x} src={} dst={} type=0x{:x} st=0x{:x}",
            kind, ev.seq, ev.src, ev.dst, ev.m_type, ev.status
        );
    }
}
