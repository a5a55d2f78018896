// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The live table: per-core evaluation, counters, and the
//! replace/commit discipline.

use super::registry::MatchOutcome;
use super::registry::Registry;
use super::rule::RuleTarget;
use super::rule::StandardTarget;
use super::translate;
use super::translate::TableLayout;
use super::wire;
use super::wire::EntryHdr;
use super::wire::ExtHdr;
use super::wire::StdTargetPayload;
use crate::api::CounterPair;
use crate::api::Disposition;
use crate::api::FwtError;
use crate::api::HOOK_COUNT;
use crate::api::Hook;
use crate::api::RuleDump;
use crate::engine::packet::PacketMeta;
use crate::sync::KRwLock;
use core::cell::Cell;
use core::num::NonZeroUsize;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use std::sync::Arc;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

/// Maximum depth of nested jumps during one evaluation. A validated
/// table cannot loop, so hitting this bound means a chain structure
/// deeper than any sane ruleset; it is treated as an anomaly.
pub const EVAL_STACK_DEPTH: usize = 64;

/// One rule's counters on one core. Only the owning core writes
/// these, so relaxed ordering suffices; the snapshot path tolerates
/// the slight skew of concurrent bumps.
#[derive(Default)]
pub struct EntryCounters {
    hits: AtomicU64,
    bytes: AtomicU64,
}

impl EntryCounters {
    fn bump(&self, len: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len, Ordering::Relaxed);
    }

    fn add(&self, delta: &CounterPair) {
        self.hits.fetch_add(delta.hits, Ordering::Relaxed);
        self.bytes.fetch_add(delta.bytes, Ordering::Relaxed);
    }

    fn read(&self) -> CounterPair {
        CounterPair {
            hits: self.hits.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

std::thread_local! {
    // Re-entrancy marker: set while an extension target runs, so a
    // misbehaving target that calls back into evaluation is caught
    // rather than allowed to recurse.
    static IN_EXT_TARGET: Cell<bool> = const { Cell::new(false) };
}

/// A validated, activatable table.
///
/// Immutable once built, except for the counters, which exist once
/// per core and are written only by that core's evaluations. All
/// other state is shared by every core.
pub struct Ruleset {
    valid_hooks: u32,
    hook_entry: [Option<usize>; HOOK_COUNT],
    underflow: [Option<usize>; HOOK_COUNT],
    entries: Vec<super::rule::RuleEntry>,
    size: usize,
    counters: Vec<Vec<EntryCounters>>,
    retired: AtomicBool,
}

impl Ruleset {
    pub fn new(layout: TableLayout, ncores: NonZeroUsize) -> Self {
        let n = layout.entries.len();
        let size = layout.entries.iter().map(|e| e.next_offset).sum();

        let counters = (0..ncores.get())
            .map(|_| (0..n).map(|_| EntryCounters::default()).collect())
            .collect();

        Self {
            valid_hooks: layout.valid_hooks,
            hook_entry: layout.hook_entry,
            underflow: layout.underflow,
            entries: layout.entries,
            size,
            counters,
            retired: AtomicBool::new(false),
        }
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn valid_hooks(&self) -> u32 {
        self.valid_hooks
    }

    /// Per-hook entry-point byte offsets, for the info response.
    /// Inactive hooks report zero.
    pub fn hook_entry_offsets(&self) -> [u32; HOOK_COUNT] {
        self.offsets_of(&self.hook_entry)
    }

    pub fn underflow_offsets(&self) -> [u32; HOOK_COUNT] {
        self.offsets_of(&self.underflow)
    }

    fn offsets_of(&self, idxs: &[Option<usize>; HOOK_COUNT]) -> [u32; HOOK_COUNT] {
        let mut out = [0u32; HOOK_COUNT];
        for (slot, idx) in out.iter_mut().zip(idxs.iter()) {
            if let Some(i) = idx {
                *slot = self.entries[*i].offset as u32;
            }
        }
        out
    }

    /// Classify one packet entering `hook`, on the replica belonging
    /// to `core`.
    ///
    /// The walk is bounded: validation proved every chain terminates,
    /// so the anomaly paths here (stack overflow, falling past the
    /// table end, re-entry from an extension target) indicate
    /// corrupted state or a misbehaving plug-in and resolve to a
    /// logged drop rather than anything clever.
    pub fn evaluate(
        &self,
        core: usize,
        hook: Hook,
        pkt: &PacketMeta,
    ) -> Disposition {
        if self.valid_hooks & hook.bit() == 0 {
            return Disposition::Accept;
        }

        let Some(start) = self.hook_entry[hook.index()] else {
            return Disposition::Accept;
        };

        if IN_EXT_TARGET.with(|m| m.get()) {
            super::err!("evaluation re-entered from an extension target");
            return Disposition::Drop;
        }

        let counters = &self.counters[core % self.counters.len()];
        let mut stack: heapless::Vec<usize, EVAL_STACK_DEPTH> =
            heapless::Vec::new();
        let mut cur = start;

        loop {
            let rule = &self.entries[cur];

            let mut matched = rule.clause.is_match(pkt);
            if matched {
                for m in &rule.matches {
                    match m.ext.is_match(pkt, &m.data) {
                        MatchOutcome::Hit => (),
                        MatchOutcome::Miss => {
                            matched = false;
                            break;
                        }
                        MatchOutcome::HardDrop => return Disposition::Drop,
                    }
                }
            }

            if !matched {
                match rule.next_idx {
                    Some(next) => {
                        cur = next;
                        continue;
                    }
                    None => {
                        super::err!(
                            "walk fell past the end of the table at {}",
                            cur,
                        );
                        return Disposition::Drop;
                    }
                }
            }

            counters[cur].bump(pkt.len);

            match &rule.target {
                RuleTarget::Standard(StandardTarget::Verdict(d)) => {
                    return *d;
                }

                RuleTarget::Standard(StandardTarget::Jump { idx, .. }) => {
                    let Some(next) = rule.next_idx else {
                        super::err!("jump with no continuation at {}", cur);
                        return Disposition::Drop;
                    };

                    if stack.push(next).is_err() {
                        super::err!("jump stack overflow at {}", cur);
                        return Disposition::Drop;
                    }

                    cur = *idx;
                }

                RuleTarget::Standard(StandardTarget::Return) => {
                    match stack.pop() {
                        Some(caller) => cur = caller,
                        // A top-level return falls to the hook's
                        // default policy: walk the underflow rule so
                        // its counters record the outcome.
                        None => match self.underflow[hook.index()] {
                            Some(under) => cur = under,
                            None => {
                                super::err!(
                                    "return with no underflow on {}",
                                    hook,
                                );
                                return Disposition::Drop;
                            }
                        },
                    }
                }

                RuleTarget::Ext(t) => {
                    IN_EXT_TARGET.with(|m| m.set(true));
                    let d = t.ext.exec(pkt, &t.data);
                    IN_EXT_TARGET.with(|m| m.set(false));
                    return d;
                }
            }
        }
    }

    /// Re-serialize the table to its wire form. Engine-internal
    /// fields (hook masks, counters, padding) are zeroed, so a blob
    /// loaded and exported round-trips modulo those fields; live
    /// counters travel separately via [`Ruleset::snapshot`].
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);

        for entry in &self.entries {
            let mut hdr = EntryHdr::new_zeroed();
            hdr.src = entry.clause.src.bytes();
            hdr.dst = entry.clause.dst.bytes();
            hdr.smask = entry.clause.smask.bytes();
            hdr.dmask = entry.clause.dmask.bytes();
            hdr.iface_in = entry.clause.iface_in;
            hdr.iface_out = entry.clause.iface_out;
            hdr.iface_in_mask = entry.clause.iface_in_mask;
            hdr.iface_out_mask = entry.clause.iface_out_mask;
            hdr.proto.set(entry.clause.proto);
            hdr.flags = entry.clause.flags.bits();
            hdr.invert = entry.clause.invert.bits();
            hdr.target_offset.set(entry.target_offset as u16);
            hdr.next_offset.set(entry.next_offset as u16);
            out.extend_from_slice(hdr.as_bytes());

            for m in &entry.matches {
                push_ext(&mut out, &m.name, &m.data);
            }

            match &entry.target {
                RuleTarget::Standard(_) => {
                    let mut ext = ExtHdr::new_zeroed();
                    ext.len.set(wire::STD_TARGET_SIZE as u16);
                    out.extend_from_slice(ext.as_bytes());

                    let mut payload = StdTargetPayload::new_zeroed();
                    // raw_verdict is Some for every standard target.
                    payload.verdict.set(
                        entry.target.raw_verdict().unwrap_or(0),
                    );
                    out.extend_from_slice(payload.as_bytes());
                }
                RuleTarget::Ext(t) => push_ext(&mut out, &t.name, &t.data),
            }
        }

        out
    }

    /// Sum each rule's counters across every core, in rule order.
    /// Call this under the same exclusive window as a replace when a
    /// globally consistent view matters.
    pub fn snapshot(&self) -> Vec<CounterPair> {
        let mut out = vec![CounterPair::default(); self.entries.len()];

        for replica in &self.counters {
            for (sum, c) in out.iter_mut().zip(replica.iter()) {
                let pair = c.read();
                sum.hits += pair.hits;
                sum.bytes += pair.bytes;
            }
        }

        out
    }

    /// Fold caller-supplied deltas into one designated replica, so a
    /// counter snapshot carried across a replace can be restored.
    pub fn merge_deltas(&self, deltas: &[CounterPair]) -> Result<(), FwtError> {
        if deltas.len() != self.entries.len() {
            return Err(FwtError::EntryCountMismatch {
                expected: self.entries.len() as u32,
                actual: deltas.len() as u32,
            });
        }

        for (c, delta) in self.counters[0].iter().zip(deltas.iter()) {
            c.add(delta);
        }

        Ok(())
    }

    /// Release the table's extension references, running destructors.
    /// Idempotent; the first caller wins.
    pub fn retire(&self, reg: &Registry) {
        if !self.retired.swap(true, Ordering::SeqCst) {
            translate::teardown(reg, &self.entries);
        }
    }

    /// Human-oriented per-rule summaries.
    pub fn dump(&self) -> Vec<RuleDump> {
        let counters = self.snapshot();

        self.entries
            .iter()
            .zip(counters.iter())
            .enumerate()
            .map(|(i, (e, c))| RuleDump {
                index: i as u32,
                offset: e.offset as u32,
                clause: e.clause.to_string(),
                matches: e.matches.iter().map(|m| m.name.clone()).collect(),
                target: e.target.to_string(),
                hook_mask: e.hook_mask,
                hits: c.hits,
                bytes: c.bytes,
            })
            .collect()
    }
}

fn push_ext(out: &mut Vec<u8>, name: &str, data: &[u8]) {
    let mut ext = ExtHdr::new_zeroed();
    ext.len.set((wire::EXT_HDR_SIZE + data.len()) as u16);

    // The name came off the wire, so it fits the field.
    let bytes = name.as_bytes();
    let n = bytes.len().min(wire::EXT_NAME_LEN);
    ext.name[..n].copy_from_slice(&bytes[..n]);

    out.extend_from_slice(ext.as_bytes());
    out.extend_from_slice(data);
}

/// The active-table slot for one named table.
///
/// The packet path takes the read side for the duration of one
/// evaluation; replacement and snapshots take the write side briefly.
/// A packet evaluated after [`TableSlot::replace`] returns sees the
/// fully-old or fully-new table, never a mixture.
pub struct TableSlot {
    slot: KRwLock<Option<Arc<Ruleset>>>,
}

impl Default for TableSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl TableSlot {
    pub fn new() -> Self {
        Self { slot: KRwLock::new(None) }
    }

    /// The currently active table, if any.
    pub fn active(&self) -> Option<Arc<Ruleset>> {
        self.slot.read().clone()
    }

    /// Evaluate one packet against the active table. A slot with no
    /// table accepts everything.
    pub fn evaluate(
        &self,
        core: usize,
        hook: Hook,
        pkt: &PacketMeta,
    ) -> Disposition {
        match &*self.slot.read() {
            Some(table) => table.evaluate(core, hook, pkt),
            None => Disposition::Accept,
        }
    }

    /// The active table plus a counter snapshot taken under the same
    /// exclusive window a replace would use, so no evaluation is
    /// mid-flight while the counters are read.
    pub fn consistent_snapshot(
        &self,
    ) -> Option<(Arc<Ruleset>, Vec<CounterPair>)> {
        let slot = self.slot.write();
        slot.as_ref().map(|t| (t.clone(), t.snapshot()))
    }

    /// Atomically substitute the active table, guarded by the
    /// caller's expectation of the current entry count. On success
    /// the displaced table and its final counter snapshot are
    /// returned; the caller retires the table outside any lock. On a
    /// guard mismatch nothing changes and the caller owns the
    /// disposal of `new`.
    pub fn replace(
        &self,
        new: Arc<Ruleset>,
        expected_old: u32,
    ) -> Result<(Option<Arc<Ruleset>>, Vec<CounterPair>), FwtError> {
        let mut slot = self.slot.write();

        let actual = match &*slot {
            Some(cur) => cur.num_entries() as u32,
            None => 0,
        };

        if actual != expected_old {
            return Err(FwtError::EntryCountMismatch {
                expected: expected_old,
                actual,
            });
        }

        let old_counters = match &*slot {
            Some(cur) => cur.snapshot(),
            None => Vec::new(),
        };

        let old = slot.replace(new);
        Ok((old, old_counters))
    }
}
