// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use super::HOOK_COUNT;
use core::fmt::Debug;
use serde::Deserialize;
use serde::Serialize;

/// The commands a privileged caller may issue against the rule table
/// engine. The command's actual request/response data is serialized
/// by serde/postcard into the byte buffers travelling alongside the
/// command number.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub enum TableCmd {
    Load = 1,        // validate and activate a new rule blob
    GetInfo = 2,     // hook layout of the active table
    GetEntries = 3,  // full rule blob + counter snapshot
    AddCounters = 4, // merge external counter deltas
    DumpTable = 5,   // human-oriented per-rule summary
}

impl TryFrom<i32> for TableCmd {
    type Error = ();

    fn try_from(num: i32) -> Result<Self, Self::Error> {
        match num {
            1 => Ok(Self::Load),
            2 => Ok(Self::GetInfo),
            3 => Ok(Self::GetEntries),
            4 => Ok(Self::AddCounters),
            5 => Ok(Self::DumpTable),
            _ => Err(()),
        }
    }
}

/// Why a table operation was rejected.
///
/// Every rejection is total: the previously active table (if any) and
/// the extension registry are left exactly as they were before the
/// call. The `EntryCountMismatch` and `SizeMismatch` variants are the
/// recoverable concurrency conflicts; the caller re-reads current
/// state and retries.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum FwtError {
    /// An entry does not start on a naturally aligned offset.
    BadAlignment { offset: u32 },
    /// The command number is not recognized.
    BadCmd(i32),
    /// The number of entries walked does not equal the declared count.
    BadEntryCount { declared: u32, walked: u32 },
    /// A match/target region is not well formed.
    BadExtLen { offset: u32, len: u32 },
    /// The IP clause carries unknown flag or inversion bits, or a
    /// reserved header field is nonzero.
    BadFlags { index: u32 },
    /// An active hook's entry or underflow offset never coincided
    /// with an entry boundary.
    BadHookOffset { hook: u32, offset: u32 },
    /// A jump does not land on an entry boundary, or has no entry to
    /// return to.
    BadJumpTarget { index: u32, target: u32 },
    /// The declared blob size disagrees with the buffer provided.
    BadLen { declared: u32, actual: u32 },
    /// An entry's offsets run outside the blob or below the minimums.
    BadOffset { offset: u32 },
    /// An underflow entry is not an unconditional standard verdict.
    BadUnderflow { hook: u32, offset: u32 },
    /// A standard target's verdict is not a jump, a terminal code,
    /// or RETURN.
    BadVerdict { index: u32, verdict: i32 },
    DeserCmdReq(String),
    /// The delta array length no longer matches the live table.
    EntryCountMismatch { expected: u32, actual: u32 },
    /// An extension with this name is already registered.
    ExtExists(String),
    /// The extension is still referenced by an active table.
    ExtInUse(String),
    /// A plug-in's own validator declined the supplied parameters.
    ExtValidate { index: u32, name: String, msg: String },
    /// A chain re-enters a rule it already visited within the same
    /// hook traversal.
    Loop { hook: u32, index: u32 },
    SerCmdResp(String),
    /// The caller's expectation of the blob size is stale.
    SizeMismatch { expected: u32, actual: u32 },
    TableNotFound(String),
    /// A named match plug-in is not present in the registry.
    UnknownMatch { index: u32, name: String },
    UnknownExt(String),
    /// A named target plug-in is not present in the registry.
    UnknownTarget { index: u32, name: String },
    /// No hook can reach this entry.
    Unreachable { index: u32 },
    /// A chain falls through past the final entry of the table.
    Unterminated { hook: u32, index: u32 },
}

/// A marker trait indicating a success response type that is returned
/// from a command and may be passed across the API boundary.
pub trait CmdOk: Debug + Serialize {}

impl CmdOk for () {}

/// Indicates no meaningful response value on success.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NoResp {
    pub unused: u64,
}

impl CmdOk for NoResp {}

/// One rule's hit/byte counters, or a delta thereof.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CounterPair {
    pub hits: u64,
    pub bytes: u64,
}

/// Validate a rule blob and activate it as the named table.
///
/// The blob layout is described in `fwtable::engine::wire`. The hook
/// offset arrays are indexed by [`crate::Hook`]; entries for hooks
/// outside `valid_hooks` are ignored. `old_num_entries` is the
/// optimistic-concurrency guard: it must equal the entry count of the
/// table currently active under this name (zero when none is).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoadReq {
    pub name: String,
    pub valid_hooks: u32,
    pub num_entries: u32,
    pub size: u32,
    pub hook_entry: [u32; HOOK_COUNT],
    pub underflow: [u32; HOOK_COUNT],
    pub old_num_entries: u32,
    pub blob: Vec<u8>,
}

/// The response to a [`LoadReq`]: the final counters of the table
/// this load displaced, in declared-rule order. Callers that want to
/// carry statistics across a replace feed these back through
/// [`AddCountersReq`].
#[derive(Debug, Deserialize, Serialize)]
pub struct LoadResp {
    pub old_counters: Vec<CounterPair>,
}

impl CmdOk for LoadResp {}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InfoReq {
    pub name: String,
}

/// The hook layout and size of the currently active table.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InfoResp {
    pub name: String,
    pub valid_hooks: u32,
    pub hook_entry: [u32; HOOK_COUNT],
    pub underflow: [u32; HOOK_COUNT],
    pub num_entries: u32,
    pub size: u32,
}

impl CmdOk for InfoResp {}

/// Fetch the full rule blob plus a freshly merged counter snapshot.
///
/// `size` is the byte size the caller believes the table has
/// (learned from [`InfoResp`]); a stale expectation is rejected with
/// [`FwtError::SizeMismatch`] rather than returning a blob the caller
/// did not size a buffer for.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EntriesReq {
    pub name: String,
    pub size: u32,
}

/// The exported blob has its counter and hook-reachability fields
/// zeroed; live counters travel in `counters`, indexed by rule
/// position in declared order.
#[derive(Debug, Deserialize, Serialize)]
pub struct EntriesResp {
    pub blob: Vec<u8>,
    pub counters: Vec<CounterPair>,
}

impl CmdOk for EntriesResp {}

/// Merge per-rule counter deltas into the live table.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AddCountersReq {
    pub name: String,
    pub counters: Vec<CounterPair>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DumpReq {
    pub name: String,
}

/// A human-oriented summary of one rule.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RuleDump {
    pub index: u32,
    pub offset: u32,
    pub clause: String,
    pub matches: Vec<String>,
    pub target: String,
    pub hook_mask: u32,
    pub hits: u64,
    pub bytes: u64,
}

/// The response to a [`DumpReq`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DumpTableResp {
    pub name: String,
    pub valid_hooks: u32,
    pub rules: Vec<RuleDump>,
}

impl CmdOk for DumpTableResp {}
