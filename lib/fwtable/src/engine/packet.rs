// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The packet header view the engine classifies against.

use super::wire::IFNAMSIZ;
use crate::api::Ipv4Addr;
use core::fmt;
use core::fmt::Display;

/// The header fields of one packet, as seen by rule evaluation.
///
/// This is a parsed view handed in by the datapath; the engine never
/// touches packet bytes itself. The interface names are NUL-padded;
/// an all-NUL name means "not applicable for this hook" (e.g. no
/// ingress interface on the output hook). `sport`/`dport` are not
/// part of the IP-level clause; they exist for extension matches that
/// interpret them.
#[derive(Clone, Copy, Debug)]
pub struct PacketMeta {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u16,
    pub is_fragment: bool,
    pub iface_in: [u8; IFNAMSIZ],
    pub iface_out: [u8; IFNAMSIZ],
    pub sport: u16,
    pub dport: u16,
    pub len: u64,
}

impl Default for PacketMeta {
    fn default() -> Self {
        Self {
            src: Ipv4Addr::ANY_ADDR,
            dst: Ipv4Addr::ANY_ADDR,
            proto: 0,
            is_fragment: false,
            iface_in: [0; IFNAMSIZ],
            iface_out: [0; IFNAMSIZ],
            sport: 0,
            dport: 0,
            len: 0,
        }
    }
}

impl PacketMeta {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, proto: u16, len: u64) -> Self {
        Self { src, dst, proto, len, ..Default::default() }
    }
}

/// NUL-pad an interface name. Names longer than the field are
/// truncated, matching what a datapath with a fixed name buffer
/// would hand us.
pub fn ifname(name: &str) -> [u8; IFNAMSIZ] {
    let mut out = [0u8; IFNAMSIZ];
    let bytes = name.as_bytes();
    let n = bytes.len().min(IFNAMSIZ - 1);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

impl Display for PacketMeta {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={} len={}",
            self.src, self.sport, self.dst, self.dport, self.proto, self.len,
        )
    }
}
