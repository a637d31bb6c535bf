// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Typed syscall error taxonomy for the IPC/scheduler core
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallError, SyscallResult
//! DEPENDS_ON: nothing else in this crate
//! INVARIANTS: every variant maps to exactly one legacy small-negative-integer return code
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use std::fmt;

/// Result type returned by every syscall-path entry point in this crate.
pub type SyscallResult<T> = Result<T, SyscallError>;

/// The eight failure modes a syscall can return, plus their legacy ABI codes.
///
/// `sys_call` itself never panics; every rejection this taxonomy names is a
/// recoverable value at the caller. The one fatal condition in this crate — a
/// kernel stack-guard overrun detected in `unready` — is not representable
/// here; it panics directly (see `Kernel::unready`), since it indicates
/// kernel corruption rather than a recoverable syscall failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyscallError {
    /// Call not in the caller's `call_mask`, or a kernel-class destination was
    /// targeted by something other than `SENDREC`, or the send-mask bit was clear.
    CallDenied,
    /// `src_dst` was neither a valid process number, `ANY`, nor the call was `ECHO`.
    BadSrcDst,
    /// The message buffer did not lie within the caller's addressable region.
    Fault,
    /// The call carries a SEND semantic but the destination slot is empty.
    DeadDst,
    /// Completing the send would form a cycle of blocked senders.
    Locked,
    /// A non-blocking caller could not complete immediately.
    NotReady,
    /// `function` did not name a known system call.
    BadCall,
    /// The notification-record free pool is exhausted.
    NoSpace,
}

impl SyscallError {
    /// The legacy small-negative-integer ABI code for this error.
    pub const fn code(self) -> i32 {
        match self {
            Self::CallDenied => -1,
            Self::BadSrcDst => -2,
            Self::Fault => -3,
            Self::DeadDst => -4,
            Self::Locked => -5,
            Self::NotReady => -6,
            Self::BadCall => -7,
            Self::NoSpace => -8,
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CallDenied => "ECALLDENIED",
            Self::BadSrcDst => "EBADSRCDST",
            Self::Fault => "EFAULT",
            Self::DeadDst => "EDEADDST",
            Self::Locked => "ELOCKED",
            Self::NotReady => "ENOTREADY",
            Self::BadCall => "EBADCALL",
            Self::NoSpace => "ENOSPC",
        };
        f.write_str(name)
    }
}

impl std::error::Error for SyscallError {}

impl From<SyscallError> for i32 {
    fn from(err: SyscallError) -> Self {
        err.code()
    }
}

impl TryFrom<i32> for SyscallError {
    type Error = ();

    /// Recovers a typed error from its legacy ABI code, the inverse of
    /// [`SyscallError::code`]. Fails for any value that isn't one of the
    /// eight reserved codes (including `OK`).
    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(Self::CallDenied),
            -2 => Ok(Self::BadSrcDst),
            -3 => Ok(Self::Fault),
            -4 => Ok(Self::DeadDst),
            -5 => Ok(Self::Locked),
            -6 => Ok(Self::NotReady),
            -7 => Ok(Self::BadCall),
            -8 => Ok(Self::NoSpace),
            _ => Err(()),
        }
    }
}

/// `OK` in the ABI sense: the success code callers check `result == OK` against.
pub const OK: i32 = 0;

/// Flattens a [`SyscallResult`] into the legacy `OK`/negative-code convention,
/// for callers at the true syscall ABI boundary. Internal code should always
/// propagate the `Result` with `?` rather than matching on raw integers.
pub fn to_abi_code<T>(result: SyscallResult<T>) -> i32 {
    match result {
        Ok(_) => OK,
        Err(e) => e.code(),
    }
}
