// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The binary layout of a rule blob.
//!
//! A table travels between the control plane and the engine as one
//! contiguous, offset-addressed byte region: a sequence of entries,
//! each a fixed [`EntryHdr`] followed by zero or more extension
//! matches and exactly one target, every piece introduced by an
//! [`ExtHdr`]. All integers are little-endian and all offsets are
//! byte offsets from the start of the blob. Entries are naturally
//! aligned to [`ALIGN`] bytes.
//!
//! Nothing in this module trusts the blob; these are plain views. The
//! checking lives in [`super::arena`] and [`super::translate`].

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::little_endian::I32;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::byteorder::little_endian::U64;

/// Natural alignment of entries and extension pieces.
pub const ALIGN: usize = 8;

/// Fixed size of an interface name, NUL-padded.
pub const IFNAMSIZ: usize = 16;

/// Maximum length of a match/target extension name.
pub const EXT_NAME_LEN: usize = 30;

pub const ENTRY_HDR_SIZE: usize = 112;
pub const EXT_HDR_SIZE: usize = 32;

/// Size of the standard target: an anonymous [`ExtHdr`] plus
/// [`StdTargetPayload`].
pub const STD_TARGET_SIZE: usize = EXT_HDR_SIZE + 8;

/// An entry carrying nothing but the standard target. The smallest
/// well-formed entry overall is a header plus a bare [`ExtHdr`].
pub const MIN_ENTRY_SIZE: usize = ENTRY_HDR_SIZE + STD_TARGET_SIZE;

/// Standard-target verdict encoding. A non-negative verdict is a jump
/// to that absolute byte offset; the negative codes are below.
pub const VERDICT_DROP: i32 = -1;
pub const VERDICT_ACCEPT: i32 = -2;
pub const VERDICT_QUEUE: i32 = -3;
pub const VERDICT_RETURN: i32 = -4;

/// Clause flag bits (`EntryHdr::flags`).
pub const FLAG_FRAG_ONLY: u8 = 0x01;
pub const FLAG_ALL: u8 = FLAG_FRAG_ONLY;

/// Clause inversion bits (`EntryHdr::invert`).
pub const INV_SRC: u8 = 0x01;
pub const INV_DST: u8 = 0x02;
pub const INV_IFACE_IN: u8 = 0x04;
pub const INV_IFACE_OUT: u8 = 0x08;
pub const INV_PROTO: u8 = 0x10;
pub const INV_FRAG: u8 = 0x20;
pub const INV_ALL: u8 = 0x3F;

/// The fixed header of one rule entry.
///
/// The `hook_mask`, `hits` and `bytes` fields are engine-internal
/// state that happens to live in the entry for layout compatibility:
/// they are ignored on input and zeroed on export.
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct EntryHdr {
    pub src: [u8; 4],
    pub dst: [u8; 4],
    pub smask: [u8; 4],
    pub dmask: [u8; 4],
    pub iface_in: [u8; IFNAMSIZ],
    pub iface_out: [u8; IFNAMSIZ],
    pub iface_in_mask: [u8; IFNAMSIZ],
    pub iface_out_mask: [u8; IFNAMSIZ],
    pub proto: U16,
    pub flags: u8,
    pub invert: u8,
    pub target_offset: U16,
    pub next_offset: U16,
    pub hook_mask: U32,
    pub pad: U32,
    pub hits: U64,
    pub bytes: U64,
}

/// The header introducing one extension match or target.
///
/// `len` covers the header itself plus the opaque parameter blob and
/// must be a multiple of [`ALIGN`]. An all-NUL name denotes the
/// standard target.
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct ExtHdr {
    pub len: U16,
    pub name: [u8; EXT_NAME_LEN],
}

/// The parameter blob of the standard target.
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct StdTargetPayload {
    pub verdict: I32,
    pub pad: U32,
}

impl ExtHdr {
    /// Is this the reserved standard target?
    pub fn is_standard(&self) -> bool {
        self.name.iter().all(|b| *b == 0)
    }

    /// The extension name, with NUL padding stripped.
    pub fn name_str(&self) -> String {
        decode_name(&self.name)
    }
}

/// Strip NUL padding from a fixed-size name field.
pub fn decode_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Is a fixed-size name field properly NUL-padded? A nonzero byte
/// after the first NUL would be silently lost by a decode/encode
/// round trip, so such fields are rejected on input.
pub fn name_is_nul_padded(bytes: &[u8]) -> bool {
    match bytes.iter().position(|b| *b == 0) {
        Some(end) => bytes[end..].iter().all(|b| *b == 0),
        None => true,
    }
}

/// NUL-pad a name into a fixed-size field. Returns `None` if the
/// name does not fit (one byte is reserved for the NUL).
pub fn encode_name<const N: usize>(name: &str) -> Option<[u8; N]> {
    let bytes = name.as_bytes();
    if bytes.len() >= N {
        return None;
    }

    let mut out = [0u8; N];
    out[..bytes.len()].copy_from_slice(bytes);
    Some(out)
}

/// Round `n` up to the next multiple of [`ALIGN`].
pub const fn pad_align(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}
