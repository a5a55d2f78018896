// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The structural pass: walk an untrusted blob and prove its offsets
//! describe a well-formed sequence of entries before anything else
//! looks at the contents.
//!
//! This pass establishes the set of entry boundaries, checks that the
//! extension pieces of each entry tile their region exactly, and
//! builds the offset-to-index map every later pass works in terms of.
//! It interprets nothing: names, verdicts and clause bits are checked
//! by [`super::translate`].

use super::wire;
use super::wire::EntryHdr;
use super::wire::ExtHdr;
use crate::api::FwtError;
use std::collections::BTreeMap;
use zerocopy::FromBytes;

/// One extension piece: a match or target header plus its parameter
/// bytes, padding included.
#[derive(Clone, Debug)]
pub struct ExtPiece {
    /// Byte offset of the piece's header within the blob.
    pub offset: usize,
    pub hdr: ExtHdr,
    /// The bytes following the header, `hdr.len - EXT_HDR_SIZE` of
    /// them.
    pub data: Vec<u8>,
}

/// The skeleton of one entry: structurally sound, semantically
/// unchecked.
#[derive(Clone, Debug)]
pub struct EntrySkel {
    /// Byte offset of the entry within the blob.
    pub offset: usize,
    pub hdr: EntryHdr,
    /// The match pieces, in wire order.
    pub matches: Vec<ExtPiece>,
    /// The single target piece.
    pub target: ExtPiece,
}

impl EntrySkel {
    pub fn target_offset(&self) -> usize {
        usize::from(self.hdr.target_offset.get())
    }

    pub fn next_offset(&self) -> usize {
        usize::from(self.hdr.next_offset.get())
    }
}

/// The outcome of a successful structural walk.
pub struct Arena {
    pub size: usize,
    pub entries: Vec<EntrySkel>,
    index_of: BTreeMap<usize, usize>,
}

impl Arena {
    /// Walk `blob` from offset zero, hopping by each entry's declared
    /// `next_offset`, and collect the entry skeletons. The walk must
    /// land exactly on `blob.len()` and must visit exactly
    /// `num_entries` entries.
    pub fn parse(blob: &[u8], num_entries: usize) -> Result<Self, FwtError> {
        let size = blob.len();
        let mut entries = Vec::new();
        let mut index_of = BTreeMap::new();
        let mut off = 0;

        while off < size {
            let skel = parse_entry(blob, off, entries.len())?;
            index_of.insert(off, entries.len());
            off += skel.next_offset();
            entries.push(skel);
        }

        // Containment checks in parse_entry keep `off` from passing
        // `size`, so reaching here means the walk landed exactly.
        if entries.len() != num_entries {
            return Err(FwtError::BadEntryCount {
                declared: num_entries as u32,
                walked: entries.len() as u32,
            });
        }

        Ok(Self { size, entries, index_of })
    }

    /// Map a byte offset to an entry index. `None` means the offset
    /// is not an entry boundary.
    pub fn index_at(&self, offset: usize) -> Option<usize> {
        self.index_of.get(&offset).copied()
    }
}

fn parse_entry(
    blob: &[u8],
    off: usize,
    idx: usize,
) -> Result<EntrySkel, FwtError> {
    let size = blob.len();

    if off % wire::ALIGN != 0 {
        return Err(FwtError::BadAlignment { offset: off as u32 });
    }

    if size - off < wire::ENTRY_HDR_SIZE + wire::EXT_HDR_SIZE {
        return Err(FwtError::BadOffset { offset: off as u32 });
    }

    let hdr =
        EntryHdr::read_from_bytes(&blob[off..off + wire::ENTRY_HDR_SIZE])
            .map_err(|_| FwtError::BadOffset { offset: off as u32 })?;

    // The reserved word must be zero; it is not preserved on export.
    if hdr.pad.get() != 0 {
        return Err(FwtError::BadFlags { index: idx as u32 });
    }

    let target_offset = usize::from(hdr.target_offset.get());
    let next_offset = usize::from(hdr.next_offset.get());

    // The target must leave room for the match region before it and
    // for at least a bare extension header after it; the whole entry
    // must stay aligned and inside the blob. An undersized standard
    // target is caught when its verdict payload is decoded.
    if target_offset < wire::ENTRY_HDR_SIZE
        || target_offset % wire::ALIGN != 0
        || next_offset % wire::ALIGN != 0
        || next_offset < target_offset + wire::EXT_HDR_SIZE
        || next_offset > size - off
    {
        return Err(FwtError::BadOffset { offset: off as u32 });
    }

    // The match region must be tiled exactly by extension pieces.
    let mut matches = Vec::new();
    let mut ext_off = off + wire::ENTRY_HDR_SIZE;
    let region_end = off + target_offset;

    while ext_off < region_end {
        let piece = parse_ext(blob, ext_off, region_end)?;
        ext_off += usize::from(piece.hdr.len.get());
        matches.push(piece);
    }

    let target = parse_ext(blob, off + target_offset, off + next_offset)?;
    if off + target_offset + usize::from(target.hdr.len.get())
        != off + next_offset
    {
        return Err(FwtError::BadExtLen {
            offset: (off + target_offset) as u32,
            len: u32::from(target.hdr.len.get()),
        });
    }

    Ok(EntrySkel { offset: off, hdr, matches, target })
}

fn parse_ext(
    blob: &[u8],
    off: usize,
    region_end: usize,
) -> Result<ExtPiece, FwtError> {
    if region_end - off < wire::EXT_HDR_SIZE {
        return Err(FwtError::BadExtLen { offset: off as u32, len: 0 });
    }

    let hdr = ExtHdr::read_from_bytes(&blob[off..off + wire::EXT_HDR_SIZE])
        .map_err(|_| FwtError::BadOffset { offset: off as u32 })?;

    let len = usize::from(hdr.len.get());
    if len < wire::EXT_HDR_SIZE
        || len % wire::ALIGN != 0
        || off + len > region_end
        || !wire::name_is_nul_padded(&hdr.name)
    {
        return Err(FwtError::BadExtLen {
            offset: off as u32,
            len: u32::from(hdr.len.get()),
        });
    }

    let data = blob[off + wire::EXT_HDR_SIZE..off + len].to_vec();
    Ok(ExtPiece { offset: off, hdr, data })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::build::EntryBuilder;
    use crate::engine::wire::VERDICT_ACCEPT;
    use crate::engine::wire::VERDICT_DROP;

    fn two_entry_blob() -> Vec<u8> {
        let mut blob = EntryBuilder::new().verdict(VERDICT_ACCEPT).build();
        blob.extend(EntryBuilder::new().verdict(VERDICT_DROP).build());
        blob
    }

    #[test]
    fn walk_counts_entries() {
        let blob = two_entry_blob();
        let arena = Arena::parse(&blob, 2).unwrap();
        assert_eq!(arena.entries.len(), 2);
        assert_eq!(arena.index_at(0), Some(0));
        assert_eq!(arena.index_at(wire::MIN_ENTRY_SIZE), Some(1));
        assert_eq!(arena.index_at(8), None);
    }

    #[test]
    fn count_mismatch() {
        let blob = two_entry_blob();
        assert!(matches!(
            Arena::parse(&blob, 3),
            Err(FwtError::BadEntryCount { declared: 3, walked: 2 }),
        ));
    }

    #[test]
    fn truncated_blob() {
        let mut blob = two_entry_blob();
        blob.truncate(blob.len() - 8);
        assert!(matches!(
            Arena::parse(&blob, 2),
            Err(FwtError::BadOffset { .. }),
        ));
    }

    #[test]
    fn next_offset_overshoot() {
        let mut blob = EntryBuilder::new().verdict(VERDICT_ACCEPT).build();
        // next_offset sits at byte 86 of the header.
        let bogus = (wire::MIN_ENTRY_SIZE + 64) as u16;
        blob[86..88].copy_from_slice(&bogus.to_le_bytes());
        assert!(matches!(
            Arena::parse(&blob, 1),
            Err(FwtError::BadOffset { offset: 0 }),
        ));
    }

    #[test]
    fn target_before_hdr_end() {
        let mut blob = EntryBuilder::new().verdict(VERDICT_ACCEPT).build();
        // target_offset sits at byte 84 of the header.
        blob[84..86].copy_from_slice(&8u16.to_le_bytes());
        assert!(matches!(
            Arena::parse(&blob, 1),
            Err(FwtError::BadOffset { offset: 0 }),
        ));
    }

    #[test]
    fn reserved_word_must_be_zero() {
        let mut blob = two_entry_blob();
        // The reserved word sits at bytes 92..96 of the header.
        let second = wire::MIN_ENTRY_SIZE;
        blob[second + 92..second + 96].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            Arena::parse(&blob, 2),
            Err(FwtError::BadFlags { index: 1 }),
        ));
    }

    #[test]
    fn ext_target_needs_no_verdict_room() {
        // An extension target with no parameters is 32 bytes, smaller
        // than the standard target. The walk must accept it.
        let blob = EntryBuilder::new().target_ext("log", &[]).build();
        assert_eq!(blob.len(), wire::ENTRY_HDR_SIZE + wire::EXT_HDR_SIZE);

        let arena = Arena::parse(&blob, 1).unwrap();
        assert_eq!(arena.entries[0].target.hdr.name_str(), "log");
        assert!(arena.entries[0].target.data.is_empty());
    }

    #[test]
    fn garbage_after_name_nul() {
        let blob = EntryBuilder::new()
            .match_ext("dport", &[0, 80, 0, 80])
            .verdict(VERDICT_ACCEPT)
            .build();

        // A stray byte between the name's terminating NUL and the end
        // of the field would not survive re-serialization.
        let mut bad = blob.clone();
        bad[wire::ENTRY_HDR_SIZE + 2 + "dport".len() + 2] = b'x';
        assert!(matches!(
            Arena::parse(&bad, 1),
            Err(FwtError::BadExtLen { .. }),
        ));
    }

    #[test]
    fn ext_region_must_tile() {
        let blob = EntryBuilder::new()
            .match_ext("dport", &[0, 80, 0, 80])
            .verdict(VERDICT_ACCEPT)
            .build();

        let arena = Arena::parse(&blob, 1).unwrap();
        assert_eq!(arena.entries[0].matches.len(), 1);
        assert_eq!(arena.entries[0].matches[0].hdr.name_str(), "dport");

        // Corrupt the match piece's len so it no longer tiles.
        let mut bad = blob.clone();
        bad[wire::ENTRY_HDR_SIZE..wire::ENTRY_HDR_SIZE + 2]
            .copy_from_slice(&(wire::EXT_HDR_SIZE as u16 + 1).to_le_bytes());
        assert!(matches!(
            Arena::parse(&bad, 1),
            Err(FwtError::BadExtLen { .. }),
        ));
    }

    #[test]
    fn empty_blob() {
        let arena = Arena::parse(&[], 0).unwrap();
        assert!(arena.entries.is_empty());
    }
}
