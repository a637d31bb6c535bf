// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host-testable core of a synchronous rendezvous IPC primitive fused
//! with a multi-level priority scheduler.
//! OWNERS: @kernel-team
//! PUBLIC API: kernel::Kernel and the supporting types re-exported below
//! DEPENDS_ON: bitflags, static_assertions (dev: proptest)
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! This crate models the process table, ready queues, and notification pool
//! as plain owned data (`Vec`-backed, arena-indexed by [`types::ProcNr`])
//! rather than bare-metal structures wired to a real MMU and UART, so the
//! whole engine can be exercised deterministically on the host. Wiring a
//! `Kernel` up to real traps, an interrupt controller, or a process manager
//! is left to an embedding crate; nothing here touches hardware.
#![forbid(unsafe_code)]

pub mod bitset;
pub mod config;
pub mod determinism;
pub mod err;
#[cfg(feature = "ipc_trace_ring")]
pub mod ipc_trace;
pub mod kernel;
pub mod lock;
pub mod log;
pub mod message;
pub mod notify;
pub mod proc_table;
pub mod ready_queue;
pub mod slotlist;
pub mod types;

pub use err::{SyscallError, SyscallResult};
pub use kernel::Kernel;
pub use message::{CallFlags, CallNr, Function, Message};
pub use types::{Priority, ProcNr, SysId};
