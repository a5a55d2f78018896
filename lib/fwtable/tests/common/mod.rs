// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Common fixtures for integration tests: a handful of well-behaved
//! (and deliberately ill-behaved) match and target extensions.

// This type of pedantry is more trouble than its worth here.
#![allow(dead_code)]

pub use fwtable::api::CounterPair;
pub use fwtable::api::Disposition;
pub use fwtable::api::FwtError;
pub use fwtable::api::Hook;
pub use fwtable::api::LoadReq;
pub use fwtable::api::PROTO_TCP;
pub use fwtable::api::PROTO_UDP;
pub use fwtable::engine::build::EntryBuilder;
pub use fwtable::engine::build::TableBuilder;
pub use fwtable::engine::ioctl::Tables;
pub use fwtable::engine::packet::PacketMeta;
pub use fwtable::engine::packet::ifname;
pub use fwtable::engine::registry::MatchExt;
pub use fwtable::engine::registry::MatchOutcome;
pub use fwtable::engine::registry::Registry;
pub use fwtable::engine::registry::TargetExt;
pub use fwtable::engine::wire::VERDICT_ACCEPT;
pub use fwtable::engine::wire::VERDICT_DROP;
pub use fwtable::engine::wire::VERDICT_QUEUE;
pub use fwtable::engine::wire::VERDICT_RETURN;

use core::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

pub fn tables(ncores: usize) -> Tables {
    Tables::new(Arc::new(Registry::new()), NonZeroUsize::new(ncores).unwrap())
}

pub fn tcp_pkt(src: &str, dst: &str, dport: u16, len: u64) -> PacketMeta {
    let mut pkt = PacketMeta::new(
        src.parse().unwrap(),
        dst.parse().unwrap(),
        PROTO_TCP,
        len,
    );
    pkt.dport = dport;
    pkt
}

/// A destination-port range match. Parameters: `[lo, hi]` as two
/// little-endian u16s, then four bytes of padding.
pub struct DportMatch {}

impl DportMatch {
    pub fn params(lo: u16, hi: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&lo.to_le_bytes());
        out.extend_from_slice(&hi.to_le_bytes());
        out
    }

    fn range(data: &[u8]) -> Option<(u16, u16)> {
        if data.len() < 4 {
            return None;
        }
        let lo = u16::from_le_bytes([data[0], data[1]]);
        let hi = u16::from_le_bytes([data[2], data[3]]);
        Some((lo, hi))
    }
}

impl MatchExt for DportMatch {
    fn validate(&self, _hook_mask: u32, data: &[u8]) -> Result<(), String> {
        match Self::range(data) {
            Some((lo, hi)) if lo <= hi => Ok(()),
            Some((lo, hi)) => Err(format!("empty port range {lo}-{hi}")),
            None => Err("short parameter blob".to_string()),
        }
    }

    fn is_match(&self, pkt: &PacketMeta, data: &[u8]) -> MatchOutcome {
        match Self::range(data) {
            Some((lo, hi)) if (lo..=hi).contains(&pkt.dport) => {
                MatchOutcome::Hit
            }
            _ => MatchOutcome::Miss,
        }
    }
}

/// Records every hook mask its validator is shown, so tests can prove
/// validators run with the complete reachability picture.
#[derive(Default)]
pub struct RecordingMatch {
    pub seen_masks: Mutex<Vec<u32>>,
}

impl MatchExt for RecordingMatch {
    fn validate(&self, hook_mask: u32, _data: &[u8]) -> Result<(), String> {
        self.seen_masks.lock().unwrap().push(hook_mask);
        Ok(())
    }

    fn is_match(&self, _pkt: &PacketMeta, _data: &[u8]) -> MatchOutcome {
        MatchOutcome::Hit
    }
}

/// Declines every placement.
pub struct RejectingMatch {}

impl MatchExt for RejectingMatch {
    fn validate(&self, _hook_mask: u32, _data: &[u8]) -> Result<(), String> {
        Err("not on my watch".to_string())
    }

    fn is_match(&self, _pkt: &PacketMeta, _data: &[u8]) -> MatchOutcome {
        MatchOutcome::Miss
    }
}

/// Counts destructor invocations, for lifecycle balance checks.
#[derive(Default)]
pub struct CountingMatch {
    pub destroyed: AtomicUsize,
}

impl MatchExt for CountingMatch {
    fn validate(&self, _hook_mask: u32, _data: &[u8]) -> Result<(), String> {
        Ok(())
    }

    fn is_match(&self, _pkt: &PacketMeta, _data: &[u8]) -> MatchOutcome {
        MatchOutcome::Hit
    }

    fn destroy(&self, _data: &[u8]) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A target that disposes by its first parameter byte:
/// 0 accept, 1 drop, anything else queue.
pub struct ByteTarget {}

impl TargetExt for ByteTarget {
    fn validate(&self, _hook_mask: u32, data: &[u8]) -> Result<(), String> {
        if data.is_empty() {
            return Err("missing disposition byte".to_string());
        }
        Ok(())
    }

    fn exec(&self, _pkt: &PacketMeta, data: &[u8]) -> Disposition {
        match data.first() {
            Some(0) => Disposition::Accept,
            Some(1) => Disposition::Drop,
            _ => Disposition::Queue,
        }
    }
}

/// A target that re-enters the engine, which the evaluation guard
/// must refuse.
pub struct ReentrantTarget {
    pub tables: Arc<Tables>,
    pub table: String,
}

impl TargetExt for ReentrantTarget {
    fn validate(&self, _hook_mask: u32, _data: &[u8]) -> Result<(), String> {
        Ok(())
    }

    fn exec(&self, pkt: &PacketMeta, _data: &[u8]) -> Disposition {
        self.tables.evaluate(&self.table, 0, Hook::LocalIn, pkt)
    }
}
