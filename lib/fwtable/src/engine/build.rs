// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Builders for constructing rule blobs in tests.
//!
//! Real callers assemble blobs with their own tooling; these exist so
//! tests can describe a table structurally ("three entries, hook at
//! index 1, a jump to index 2") and get correct offsets without
//! hand-computing them. Only compiled for tests and `test-help`.

use super::rule::iface_pattern;
use super::wire;
use super::wire::EntryHdr;
use super::wire::ExtHdr;
use super::wire::StdTargetPayload;
use crate::api::HOOK_COUNT;
use crate::api::Hook;
use crate::api::Ipv4Addr;
use crate::api::LoadReq;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

enum Target {
    /// A standard target with a raw verdict value (terminal code or
    /// absolute byte offset).
    Std(i32),
    /// A standard jump to an entry index, resolved to a byte offset
    /// by [`TableBuilder::build`].
    JumpIdx(usize),
    Ext(String, Vec<u8>),
}

pub struct EntryBuilder {
    src: (Ipv4Addr, Ipv4Addr),
    dst: (Ipv4Addr, Ipv4Addr),
    iface_in: ([u8; wire::IFNAMSIZ], [u8; wire::IFNAMSIZ]),
    iface_out: ([u8; wire::IFNAMSIZ], [u8; wire::IFNAMSIZ]),
    proto: u16,
    flags: u8,
    invert: u8,
    matches: Vec<(String, Vec<u8>)>,
    target: Target,
}

impl Default for EntryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryBuilder {
    /// A fresh entry: empty clause, no matches, standard ACCEPT.
    pub fn new() -> Self {
        Self {
            src: (Ipv4Addr::ANY_ADDR, Ipv4Addr::ANY_ADDR),
            dst: (Ipv4Addr::ANY_ADDR, Ipv4Addr::ANY_ADDR),
            iface_in: ([0; wire::IFNAMSIZ], [0; wire::IFNAMSIZ]),
            iface_out: ([0; wire::IFNAMSIZ], [0; wire::IFNAMSIZ]),
            proto: 0,
            flags: 0,
            invert: 0,
            matches: Vec::new(),
            target: Target::Std(wire::VERDICT_ACCEPT),
        }
    }

    pub fn src(mut self, addr: &str, prefix: u8) -> Self {
        let mask = Ipv4Addr::mask_bits(prefix);
        self.src = (addr.parse::<Ipv4Addr>().unwrap() & mask, mask);
        self
    }

    pub fn dst(mut self, addr: &str, prefix: u8) -> Self {
        let mask = Ipv4Addr::mask_bits(prefix);
        self.dst = (addr.parse::<Ipv4Addr>().unwrap() & mask, mask);
        self
    }

    pub fn iface_in(mut self, pat: &str) -> Self {
        self.iface_in = iface_pattern(pat);
        self
    }

    pub fn iface_out(mut self, pat: &str) -> Self {
        self.iface_out = iface_pattern(pat);
        self
    }

    pub fn proto(mut self, proto: u16) -> Self {
        self.proto = proto;
        self
    }

    pub fn frag_only(mut self) -> Self {
        self.flags |= wire::FLAG_FRAG_ONLY;
        self
    }

    pub fn invert(mut self, bits: u8) -> Self {
        self.invert |= bits;
        self
    }

    pub fn match_ext(mut self, name: &str, data: &[u8]) -> Self {
        self.matches.push((name.to_string(), data.to_vec()));
        self
    }

    pub fn verdict(mut self, verdict: i32) -> Self {
        self.target = Target::Std(verdict);
        self
    }

    /// Jump to the entry at this index in the enclosing
    /// [`TableBuilder`].
    pub fn jump_to(mut self, idx: usize) -> Self {
        self.target = Target::JumpIdx(idx);
        self
    }

    /// Jump to a raw byte offset, no questions asked.
    pub fn jump_raw(mut self, off: u32) -> Self {
        self.target = Target::Std(off as i32);
        self
    }

    pub fn target_ext(mut self, name: &str, data: &[u8]) -> Self {
        self.target = Target::Ext(name.to_string(), data.to_vec());
        self
    }

    fn target_size(&self) -> usize {
        match &self.target {
            Target::Std(_) | Target::JumpIdx(_) => wire::STD_TARGET_SIZE,
            Target::Ext(_, data) => {
                wire::pad_align(wire::EXT_HDR_SIZE + data.len())
            }
        }
    }

    fn target_offset(&self) -> usize {
        let ext: usize = self
            .matches
            .iter()
            .map(|(_, data)| wire::pad_align(wire::EXT_HDR_SIZE + data.len()))
            .sum();
        wire::ENTRY_HDR_SIZE + ext
    }

    /// The serialized size of this entry.
    pub fn size(&self) -> usize {
        self.target_offset() + self.target_size()
    }

    /// Serialize the entry. Panics on an unresolved [`jump_to`]; use
    /// [`TableBuilder::build`] for index-addressed jumps.
    ///
    /// [`jump_to`]: EntryBuilder::jump_to
    pub fn build(&self) -> Vec<u8> {
        let mut hdr = EntryHdr::new_zeroed();
        hdr.src = self.src.0.bytes();
        hdr.smask = self.src.1.bytes();
        hdr.dst = self.dst.0.bytes();
        hdr.dmask = self.dst.1.bytes();
        hdr.iface_in = self.iface_in.0;
        hdr.iface_in_mask = self.iface_in.1;
        hdr.iface_out = self.iface_out.0;
        hdr.iface_out_mask = self.iface_out.1;
        hdr.proto.set(self.proto);
        hdr.flags = self.flags;
        hdr.invert = self.invert;
        hdr.target_offset.set(self.target_offset() as u16);
        hdr.next_offset.set(self.size() as u16);

        let mut out = hdr.as_bytes().to_vec();

        for (name, data) in &self.matches {
            push_ext(&mut out, name, data);
        }

        match &self.target {
            Target::Std(verdict) => {
                let mut ext = ExtHdr::new_zeroed();
                ext.len.set(wire::STD_TARGET_SIZE as u16);
                out.extend_from_slice(ext.as_bytes());

                let mut payload = StdTargetPayload::new_zeroed();
                payload.verdict.set(*verdict);
                out.extend_from_slice(payload.as_bytes());
            }
            Target::JumpIdx(idx) => {
                panic!("unresolved jump to entry {idx}; build via TableBuilder")
            }
            Target::Ext(name, data) => push_ext(&mut out, name, data),
        }

        out
    }
}

fn push_ext(out: &mut Vec<u8>, name: &str, data: &[u8]) {
    let len = wire::pad_align(wire::EXT_HDR_SIZE + data.len());

    let mut ext = ExtHdr::new_zeroed();
    ext.len.set(len as u16);
    ext.name = wire::encode_name(name).unwrap();

    out.extend_from_slice(ext.as_bytes());
    out.extend_from_slice(data);
    out.resize(out.len() + (len - wire::EXT_HDR_SIZE - data.len()), 0);
}

enum HookSpec {
    /// Entry-point and underflow, as entry indices.
    Index(usize, usize),
    /// Entry-point and underflow, as raw byte offsets.
    Raw(u32, u32),
}

pub struct TableBuilder {
    name: String,
    entries: Vec<EntryBuilder>,
    hooks: Vec<(Hook, HookSpec)>,
    old_num_entries: u32,
}

impl TableBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
            hooks: Vec::new(),
            old_num_entries: 0,
        }
    }

    pub fn entry(mut self, e: EntryBuilder) -> Self {
        self.entries.push(e);
        self
    }

    /// Activate a hook, giving its entry-point and underflow as entry
    /// indices.
    pub fn hook(mut self, hook: Hook, entry: usize, under: usize) -> Self {
        self.hooks.push((hook, HookSpec::Index(entry, under)));
        self
    }

    /// Activate a hook with raw byte offsets, for tests that want to
    /// aim one somewhere structurally wrong.
    pub fn hook_raw(mut self, hook: Hook, entry: u32, under: u32) -> Self {
        self.hooks.push((hook, HookSpec::Raw(entry, under)));
        self
    }

    /// Set the optimistic-concurrency guard.
    pub fn old_count(mut self, n: u32) -> Self {
        self.old_num_entries = n;
        self
    }

    /// Byte offset of the entry at `idx`.
    pub fn offset_of(&self, idx: usize) -> usize {
        self.entries[..idx].iter().map(EntryBuilder::size).sum()
    }

    pub fn build(self) -> LoadReq {
        let mut valid_hooks = 0;
        let mut hook_entry = [0u32; HOOK_COUNT];
        let mut underflow = [0u32; HOOK_COUNT];

        for (hook, spec) in &self.hooks {
            valid_hooks |= hook.bit();
            let (entry, under) = match spec {
                HookSpec::Index(e, u) => {
                    (self.offset_of(*e) as u32, self.offset_of(*u) as u32)
                }
                HookSpec::Raw(e, u) => (*e, *u),
            };
            hook_entry[hook.index()] = entry;
            underflow[hook.index()] = under;
        }

        // Resolve index-addressed jumps now that offsets are known.
        let mut blob = Vec::new();
        for entry in &self.entries {
            let bytes = match &entry.target {
                Target::JumpIdx(idx) => {
                    entry.build_with_verdict(self.offset_of(*idx) as i32)
                }
                _ => entry.build(),
            };
            blob.extend(bytes);
        }

        LoadReq {
            name: self.name,
            valid_hooks,
            num_entries: self.entries.len() as u32,
            size: blob.len() as u32,
            hook_entry,
            underflow,
            old_num_entries: self.old_num_entries,
            blob,
        }
    }
}

impl EntryBuilder {
    /// Serialize with the standard target forced to `verdict`,
    /// leaving everything else as configured.
    fn build_with_verdict(&self, verdict: i32) -> Vec<u8> {
        let resolved = Self {
            src: self.src,
            dst: self.dst,
            iface_in: self.iface_in,
            iface_out: self.iface_out,
            proto: self.proto,
            flags: self.flags,
            invert: self.invert,
            matches: self.matches.clone(),
            target: Target::Std(verdict),
        };
        resolved.build()
    }
}
