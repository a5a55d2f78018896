// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Rules: the IP-level clause and the resolved entry form.

use super::packet::PacketMeta;
use super::registry::MatchExt;
use super::registry::TargetExt;
use super::wire;
use super::wire::EntryHdr;
use super::wire::IFNAMSIZ;
use crate::api::Disposition;
use crate::api::Ipv4Addr;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use std::sync::Arc;

bitflags! {
    /// Clause flag bits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ClauseFlags: u8 {
        /// The rule applies only to fragments.
        const FRAG_ONLY = wire::FLAG_FRAG_ONLY;
    }
}

bitflags! {
    /// Which clause fields have their sense inverted.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ClauseInvert: u8 {
        const SRC = wire::INV_SRC;
        const DST = wire::INV_DST;
        const IFACE_IN = wire::INV_IFACE_IN;
        const IFACE_OUT = wire::INV_IFACE_OUT;
        const PROTO = wire::INV_PROTO;
        const FRAG = wire::INV_FRAG;
    }
}

/// The IP-level match clause of one rule.
///
/// A field matches when `(packet_field & mask) == rule_field`,
/// optionally negated by that field's [`ClauseInvert`] bit; the whole
/// clause matches only if every field matches. A protocol of zero is
/// a wildcard and is never inverted.
#[derive(Clone, Debug)]
pub struct IpClause {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub smask: Ipv4Addr,
    pub dmask: Ipv4Addr,
    pub iface_in: [u8; IFNAMSIZ],
    pub iface_out: [u8; IFNAMSIZ],
    pub iface_in_mask: [u8; IFNAMSIZ],
    pub iface_out_mask: [u8; IFNAMSIZ],
    pub proto: u16,
    pub flags: ClauseFlags,
    pub invert: ClauseInvert,
}

impl Default for IpClause {
    fn default() -> Self {
        Self {
            src: Ipv4Addr::ANY_ADDR,
            dst: Ipv4Addr::ANY_ADDR,
            smask: Ipv4Addr::ANY_ADDR,
            dmask: Ipv4Addr::ANY_ADDR,
            iface_in: [0; IFNAMSIZ],
            iface_out: [0; IFNAMSIZ],
            iface_in_mask: [0; IFNAMSIZ],
            iface_out_mask: [0; IFNAMSIZ],
            proto: 0,
            flags: ClauseFlags::empty(),
            invert: ClauseInvert::empty(),
        }
    }
}

/// Per-byte comparison under a mask. A wildcard-suffix pattern is
/// simply a mask that stops covering bytes at the suffix; an all-zero
/// mask matches any interface.
fn iface_match(
    pkt: &[u8; IFNAMSIZ],
    name: &[u8; IFNAMSIZ],
    mask: &[u8; IFNAMSIZ],
) -> bool {
    let mut ret = 0u8;
    for i in 0..IFNAMSIZ {
        ret |= (pkt[i] ^ name[i]) & mask[i];
    }
    ret == 0
}

/// Build a `(name, mask)` pair from a textual interface pattern. A
/// trailing `+` is the wildcard suffix; otherwise the mask covers the
/// name plus its terminating NUL, demanding an exact match.
pub fn iface_pattern(pat: &str) -> ([u8; IFNAMSIZ], [u8; IFNAMSIZ]) {
    let mut name = [0u8; IFNAMSIZ];
    let mut mask = [0u8; IFNAMSIZ];

    let (stem, wild) = match pat.strip_suffix('+') {
        Some(stem) => (stem, true),
        None => (pat, false),
    };

    let bytes = stem.as_bytes();
    let n = bytes.len().min(IFNAMSIZ - 1);
    name[..n].copy_from_slice(&bytes[..n]);

    let cover = if wild { n } else { n + 1 };
    for b in mask.iter_mut().take(cover) {
        *b = 0xFF;
    }

    (name, mask)
}

impl IpClause {
    /// Lift a clause out of a wire header. Fails if the header
    /// carries flag or inversion bits this engine does not know.
    pub fn from_hdr(hdr: &EntryHdr) -> Result<Self, ()> {
        let flags = ClauseFlags::from_bits(hdr.flags).ok_or(())?;
        let invert = ClauseInvert::from_bits(hdr.invert).ok_or(())?;

        Ok(Self {
            src: Ipv4Addr::from(hdr.src),
            dst: Ipv4Addr::from(hdr.dst),
            smask: Ipv4Addr::from(hdr.smask),
            dmask: Ipv4Addr::from(hdr.dmask),
            iface_in: hdr.iface_in,
            iface_out: hdr.iface_out,
            iface_in_mask: hdr.iface_in_mask,
            iface_out_mask: hdr.iface_out_mask,
            proto: hdr.proto.get(),
            flags,
            invert,
        })
    }

    /// Does this clause place no condition at all on a packet?
    pub fn is_empty(&self) -> bool {
        self.src == Ipv4Addr::ANY_ADDR
            && self.dst == Ipv4Addr::ANY_ADDR
            && self.smask == Ipv4Addr::ANY_ADDR
            && self.dmask == Ipv4Addr::ANY_ADDR
            && self.iface_in_mask == [0; IFNAMSIZ]
            && self.iface_out_mask == [0; IFNAMSIZ]
            && self.proto == 0
            && self.flags.is_empty()
            && self.invert.is_empty()
    }

    /// Test the clause against a packet header, short-circuiting on
    /// the first mismatching field.
    pub fn is_match(&self, pkt: &PacketMeta) -> bool {
        let inv = |bit| self.invert.contains(bit);

        if !(((pkt.src & self.smask) == self.src) ^ inv(ClauseInvert::SRC)) {
            return false;
        }

        if !(((pkt.dst & self.dmask) == self.dst) ^ inv(ClauseInvert::DST)) {
            return false;
        }

        let in_ok =
            iface_match(&pkt.iface_in, &self.iface_in, &self.iface_in_mask);
        if !(in_ok ^ inv(ClauseInvert::IFACE_IN)) {
            return false;
        }

        let out_ok =
            iface_match(&pkt.iface_out, &self.iface_out, &self.iface_out_mask);
        if !(out_ok ^ inv(ClauseInvert::IFACE_OUT)) {
            return false;
        }

        if self.proto != 0
            && !((pkt.proto == self.proto) ^ inv(ClauseInvert::PROTO))
        {
            return false;
        }

        if self.flags.contains(ClauseFlags::FRAG_ONLY)
            && !(pkt.is_fragment ^ inv(ClauseInvert::FRAG))
        {
            return false;
        }

        true
    }
}

impl Display for IpClause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "any");
        }

        let inv = |bit| {
            if self.invert.contains(bit) { "!" } else { "" }
        };

        write!(
            f,
            "src={}{}/{} dst={}{}/{}",
            inv(ClauseInvert::SRC),
            self.src,
            self.smask,
            inv(ClauseInvert::DST),
            self.dst,
            self.dmask,
        )?;

        if self.iface_in_mask != [0; IFNAMSIZ] {
            write!(
                f,
                " in={}{}",
                inv(ClauseInvert::IFACE_IN),
                wire::decode_name(&self.iface_in),
            )?;
        }

        if self.iface_out_mask != [0; IFNAMSIZ] {
            write!(
                f,
                " out={}{}",
                inv(ClauseInvert::IFACE_OUT),
                wire::decode_name(&self.iface_out),
            )?;
        }

        if self.proto != 0 {
            write!(f, " proto={}{}", inv(ClauseInvert::PROTO), self.proto)?;
        }

        if self.flags.contains(ClauseFlags::FRAG_ONLY) {
            write!(f, " {}frag", inv(ClauseInvert::FRAG))?;
        }

        Ok(())
    }
}

/// A resolved reference to an extension: the handle is looked up in
/// the registry once, at validation time, and dispatched through
/// directly on the packet path. `data` is the extension's opaque
/// parameter blob, padding included, exactly as it sat on the wire.
#[derive(Clone)]
pub struct ExtRef<T> {
    pub name: String,
    pub data: Vec<u8>,
    pub ext: T,
}

pub type MatchRef = ExtRef<Arc<dyn MatchExt>>;
pub type TargetRef = ExtRef<Arc<dyn TargetExt>>;

impl<T> fmt::Debug for ExtRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExtRef {{ name: {}, len: {} }}", self.name, self.data.len())
    }
}

/// The decoded standard target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StandardTarget {
    /// A terminal disposition.
    Verdict(Disposition),
    /// Pop the jump stack back to the caller chain.
    Return,
    /// Absolute move to another rule. The byte offset is retained
    /// for re-serialization; evaluation uses only the index.
    Jump { idx: usize, off: u32 },
}

#[derive(Clone, Debug)]
pub enum RuleTarget {
    Standard(StandardTarget),
    Ext(TargetRef),
}

impl RuleTarget {
    pub fn raw_verdict(&self) -> Option<i32> {
        match self {
            Self::Standard(StandardTarget::Verdict(Disposition::Drop)) => {
                Some(wire::VERDICT_DROP)
            }
            Self::Standard(StandardTarget::Verdict(Disposition::Accept)) => {
                Some(wire::VERDICT_ACCEPT)
            }
            Self::Standard(StandardTarget::Verdict(Disposition::Queue)) => {
                Some(wire::VERDICT_QUEUE)
            }
            Self::Standard(StandardTarget::Return) => {
                Some(wire::VERDICT_RETURN)
            }
            Self::Standard(StandardTarget::Jump { off, .. }) => {
                Some(*off as i32)
            }
            Self::Ext(_) => None,
        }
    }
}

impl Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Standard(StandardTarget::Verdict(d)) => write!(f, "{}", d),
            Self::Standard(StandardTarget::Return) => write!(f, "return"),
            Self::Standard(StandardTarget::Jump { off, .. }) => {
                write!(f, "jump -> {:#x}", off)
            }
            Self::Ext(t) => write!(f, "ext: {}", t.name),
        }
    }
}

/// One fully resolved firewall rule.
///
/// Offsets are retained from the wire form so the table can be
/// re-serialized byte-for-byte; evaluation never consults them.
#[derive(Clone, Debug)]
pub struct RuleEntry {
    pub clause: IpClause,
    pub matches: Vec<MatchRef>,
    pub target: RuleTarget,
    /// Byte offset of this entry within the table.
    pub offset: usize,
    pub target_offset: usize,
    pub next_offset: usize,
    /// Index of the fallthrough entry; `None` for the final entry.
    pub next_idx: Option<usize>,
    /// Which hooks can reach this rule, computed by the loop checker.
    pub hook_mask: u32,
}

impl RuleEntry {
    /// An unconditional rule matches every packet: an empty clause
    /// and no extension matches.
    pub fn is_unconditional(&self) -> bool {
        self.clause.is_empty() && self.matches.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::PROTO_TCP;
    use crate::engine::packet::ifname;

    fn pkt(src: &str, dst: &str) -> PacketMeta {
        PacketMeta::new(
            src.parse().unwrap(),
            dst.parse().unwrap(),
            PROTO_TCP,
            100,
        )
    }

    #[test]
    fn empty_clause_matches_anything() {
        let clause = IpClause::default();
        assert!(clause.is_empty());
        assert!(clause.is_match(&pkt("10.0.0.1", "192.168.1.9")));
        assert!(clause.is_match(&PacketMeta::default()));
    }

    #[test]
    fn addr_match_and_invert() {
        let mut clause = IpClause {
            src: "10.1.0.0".parse().unwrap(),
            smask: Ipv4Addr::mask_bits(16),
            ..Default::default()
        };

        assert!(clause.is_match(&pkt("10.1.2.3", "1.2.3.4")));
        assert!(!clause.is_match(&pkt("10.2.2.3", "1.2.3.4")));

        clause.invert = ClauseInvert::SRC;
        assert!(!clause.is_match(&pkt("10.1.2.3", "1.2.3.4")));
        assert!(clause.is_match(&pkt("10.2.2.3", "1.2.3.4")));
    }

    #[test]
    fn proto_wildcard() {
        let clause = IpClause { proto: 0, ..Default::default() };
        assert!(clause.is_match(&pkt("1.1.1.1", "2.2.2.2")));

        let clause = IpClause { proto: 17, ..Default::default() };
        assert!(!clause.is_match(&pkt("1.1.1.1", "2.2.2.2")));
    }

    #[test]
    fn iface_wildcard_suffix() {
        let (name, mask) = iface_pattern("eth+");
        let clause = IpClause {
            iface_in: name,
            iface_in_mask: mask,
            ..Default::default()
        };

        let mut p = pkt("1.1.1.1", "2.2.2.2");
        p.iface_in = ifname("eth0");
        assert!(clause.is_match(&p));
        p.iface_in = ifname("eth12");
        assert!(clause.is_match(&p));
        p.iface_in = ifname("wlan0");
        assert!(!clause.is_match(&p));
    }

    #[test]
    fn iface_exact() {
        let (name, mask) = iface_pattern("eth0");
        let clause = IpClause {
            iface_in: name,
            iface_in_mask: mask,
            ..Default::default()
        };

        let mut p = pkt("1.1.1.1", "2.2.2.2");
        p.iface_in = ifname("eth0");
        assert!(clause.is_match(&p));
        // The mask covers the NUL, so a longer name must not match.
        p.iface_in = ifname("eth01");
        assert!(!clause.is_match(&p));
    }

    #[test]
    fn frag_only() {
        let clause = IpClause {
            flags: ClauseFlags::FRAG_ONLY,
            ..Default::default()
        };

        let mut p = pkt("1.1.1.1", "2.2.2.2");
        assert!(!clause.is_match(&p));
        p.is_fragment = true;
        assert!(clause.is_match(&p));

        let clause = IpClause {
            flags: ClauseFlags::FRAG_ONLY,
            invert: ClauseInvert::FRAG,
            ..Default::default()
        };
        assert!(!clause.is_match(&p));
        p.is_fragment = false;
        assert!(clause.is_match(&p));
    }

    #[test]
    fn unknown_bits_rejected() {
        use zerocopy::FromZeros;

        let mut hdr = EntryHdr::new_zeroed();
        hdr.flags = 0x80;
        assert!(IpClause::from_hdr(&hdr).is_err());

        hdr.flags = 0;
        hdr.invert = 0x40;
        assert!(IpClause::from_hdr(&hdr).is_err());

        hdr.invert = wire::INV_SRC;
        assert!(IpClause::from_hdr(&hdr).is_ok());
    }
}
