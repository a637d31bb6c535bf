// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Intrusive singly-linked list over process-table slots (caller_q)
//! OWNERS: @kernel-team
//! PUBLIC API: push_tail, remove_where
//! DEPENDS_ON: crate::proc_table::Process, crate::types::ProcNr
//! INVARIANTS: a slot's q_link is Some(_) only while it is a non-tail member of exactly one such list
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! Replaces the source's pointer-pointer traversal idiom (see proc.c's opening
//! comment) with typed arena indices over the process table: `head` plays the
//! role of the initial pointer-pointer, and `q_link` is each slot's one-and-only
//! next-pointer. There is no special case for removing the head versus a middle
//! node; both go through the same scan in `remove_where`.

use crate::proc_table::Process;
use crate::types::ProcNr;

/// Appends `node` to the tail of the list rooted at `*head` (mini_send's
/// caller_q append: "find end of list ... add caller to end").
pub fn push_tail(procs: &mut [Process], head: &mut Option<ProcNr>, node: ProcNr) {
    let node_idx = node.index().expect("real process number required");
    procs[node_idx].q_link = None;

    match head {
        None => *head = Some(node),
        Some(first) => {
            let mut cursor = *first;
            loop {
                let cursor_idx = cursor.index().expect("real process number required");
                match procs[cursor_idx].q_link {
                    Some(next) => cursor = next,
                    None => {
                        procs[cursor_idx].q_link = Some(node);
                        break;
                    }
                }
            }
        }
    }
}

/// Finds the first node in the list rooted at `*head` satisfying `pred`,
/// unlinks it (fixing up `*head` if it was the first node), and returns it.
/// This is the single traversal used by both of `mini_receive`'s `caller_q`
/// unlink sites, so there is exactly one place that can get list surgery wrong.
pub fn remove_where(
    procs: &mut [Process],
    head: &mut Option<ProcNr>,
    mut pred: impl FnMut(ProcNr) -> bool,
) -> Option<ProcNr> {
    let mut prev: Option<ProcNr> = None;
    let mut cursor = *head;

    while let Some(node) = cursor {
        let node_idx = node.index().expect("real process number required");
        let next = procs[node_idx].q_link;

        if pred(node) {
            match prev {
                None => *head = next,
                Some(p) => {
                    let p_idx = p.index().expect("real process number required");
                    procs[p_idx].q_link = next;
                }
            }
            procs[node_idx].q_link = None;
            return Some(node);
        }

        prev = cursor;
        cursor = next;
    }

    None
}

/// Iterates the list rooted at `head` without mutating it, for diagnostics and
/// invariant checks (not used on the hot path).
pub fn iter<'a>(procs: &'a [Process], head: Option<ProcNr>) -> impl Iterator<Item = ProcNr> + 'a {
    let mut cursor = head;
    std::iter::from_fn(move || {
        let node = cursor?;
        cursor = procs[node.index().expect("real process number required")].q_link;
        Some(node)
    })
}
