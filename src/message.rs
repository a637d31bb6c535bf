// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! IPC message and syscall-number encoding.
//!
//! Message copying itself is treated as an opaque byte-move (out of scope, per
//! the process table's external memory-map collaborator); this module only
//! defines the shape of the value that moves.

use crate::types::ProcNr;

/// Fixed payload capacity, analogous to the source's `MESS_SIZE` (a whole
/// message, clicks included, is this many bytes in the caller's address space).
pub const MESS_SIZE: usize = 48;

// `call_nr`'s low byte packs the function (see `Function::from_low_bits`); a
// seventh function would overflow the reserved encoding this crate documents.
static_assertions::const_assert!(MESS_SIZE >= 8);

/// A message exchanged between two process-table slots, or synthesized by the
/// kernel itself for a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message {
    pub m_source: ProcNr,
    pub m_type: u16,
    /// Set only on notification messages; cleared (0) on ordinary SEND/RECEIVE payloads.
    pub notify_arg: u32,
    pub notify_flags: u16,
    pub notify_timestamp: u64,
    pub payload: [u8; MESS_SIZE],
}

impl Message {
    /// An ordinary data message carrying an arbitrary caller-supplied payload.
    pub fn data(source: ProcNr, m_type: u16, payload: [u8; MESS_SIZE]) -> Self {
        Self {
            m_source: source,
            m_type,
            notify_arg: 0,
            notify_flags: 0,
            notify_timestamp: 0,
            payload,
        }
    }

    /// The empty message used to prime a receive buffer before delivery.
    pub fn empty() -> Self {
        Self {
            m_source: ProcNr::ANY,
            m_type: 0,
            notify_arg: 0,
            notify_flags: 0,
            notify_timestamp: 0,
            payload: [0; MESS_SIZE],
        }
    }
}

/// `NOTIFY_FROM(src)`: the synthetic message type stamped on every notification,
/// distinguishing it from ordinary SEND/RECEIVE traffic by construction (no
/// notification can collide with a caller-chosen `m_type`).
///
/// The source packs this as an offset into the task-number space; since process
/// creation and numbering are out of scope here, this crate uses a fixed high
/// bit plus the raw source number, which preserves the "notifications occupy a
/// disjoint type range" property without depending on task-table layout.
pub const NOTIFY_TYPE_BIT: u16 = 0x7000;

#[inline]
pub fn notify_from(src: ProcNr) -> u16 {
    NOTIFY_TYPE_BIT | (src.raw() as u16 & 0x0fff)
}

/// Low bits of `call_nr`: which system call is being requested.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Function {
    Send,
    Receive,
    SendRec,
    Notify,
    Alert,
    Echo,
}

impl Function {
    /// Whether this function carries a message buffer across the trap boundary
    /// (the source's "SENDREC bit set across the function encoding" check).
    #[inline]
    pub const fn carries_message(self) -> bool {
        matches!(
            self,
            Self::Send | Self::Receive | Self::SendRec | Self::Echo | Self::Notify
        )
    }

    /// Whether this function has SEND semantics (subject to the send-mask check).
    #[inline]
    pub const fn is_send(self) -> bool {
        matches!(self, Self::Send | Self::SendRec | Self::Notify | Self::Alert)
    }

    /// Decodes the low bits of a raw `call_nr`, the source's function field.
    const fn from_low_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Self::Send),
            2 => Some(Self::Receive),
            3 => Some(Self::SendRec),
            4 => Some(Self::Notify),
            5 => Some(Self::Alert),
            6 => Some(Self::Echo),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// High bits of `call_nr`: modifiers that change blocking/delivery behavior.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CallFlags: u8 {
        /// Fail with `ENOTREADY` instead of blocking when the call cannot complete immediately.
        const NON_BLOCKING = 0b0000_0001;
        /// Suppress pending-notification delivery on this receive (SENDREC's second half).
        const FRESH_ANSWER = 0b0000_0010;
    }
}

/// A decoded `call_nr`: low bits name the function, high bits are modifier flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallNr {
    pub function: Function,
    pub flags: CallFlags,
}

impl CallNr {
    pub const fn new(function: Function, flags: CallFlags) -> Self {
        Self { function, flags }
    }

    /// Decodes a raw `call_nr` as it would arrive across the trap boundary:
    /// low byte is the function, next byte the flag bits. An unrecognized
    /// function fails `EBADCALL`, matching §4.1's "unknown functions fail".
    pub fn decode(raw: u32) -> crate::err::SyscallResult<Self> {
        let low = (raw & 0xff) as u8;
        let high = ((raw >> 8) & 0xff) as u8;
        let function = Function::from_low_bits(low).ok_or(crate::err::SyscallError::BadCall)?;
        let flags = CallFlags::from_bits_truncate(high);
        Ok(Self { function, flags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_from_is_disjoint_from_low_type_range() {
        assert!(notify_from(ProcNr::HARDWARE) & NOTIFY_TYPE_BIT != 0);
        assert!(notify_from(ProcNr::new(3)) & NOTIFY_TYPE_BIT != 0);
    }

    #[test]
    fn sendrec_carries_message_and_is_send() {
        assert!(Function::SendRec.carries_message());
        assert!(Function::SendRec.is_send());
        assert!(!Function::Receive.is_send());
        assert!(Function::Receive.carries_message());
    }

    #[test]
    fn alert_has_send_semantics_but_no_payload() {
        assert!(Function::Alert.is_send());
        assert!(!Function::Alert.carries_message());
    }

    #[test]
    fn decode_roundtrips_known_functions() {
        let call = CallNr::decode(3 | (0b11 << 8)).unwrap();
        assert_eq!(call.function, Function::SendRec);
        assert!(call.flags.contains(CallFlags::NON_BLOCKING));
        assert!(call.flags.contains(CallFlags::FRESH_ANSWER));
    }

    #[test]
    fn decode_rejects_unknown_function() {
        use crate::err::SyscallError;
        assert_eq!(CallNr::decode(99).unwrap_err(), SyscallError::BadCall);
    }
}
