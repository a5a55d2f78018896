// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The control-plane surface: named tables and the command envelope.
//!
//! A privileged caller addresses the engine with a command number and
//! a postcard-serialized request buffer; responses travel back the
//! same way. The packet path bypasses all of this and calls
//! [`Tables::evaluate`] directly.

use super::packet::PacketMeta;
use super::registry::Registry;
use super::table::Ruleset;
use super::table::TableSlot;
use super::translate::translate;
use crate::api::AddCountersReq;
use crate::api::CmdOk;
use crate::api::Disposition;
use crate::api::DumpReq;
use crate::api::DumpTableResp;
use crate::api::EntriesReq;
use crate::api::EntriesResp;
use crate::api::FwtError;
use crate::api::Hook;
use crate::api::InfoReq;
use crate::api::InfoResp;
use crate::api::LoadReq;
use crate::api::LoadResp;
use crate::api::NoResp;
use crate::api::TableCmd;
use crate::sync::KMutex;
use core::num::NonZeroUsize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The set of named tables sharing one extension registry.
pub struct Tables {
    registry: Arc<Registry>,
    ncores: NonZeroUsize,
    tables: KMutex<BTreeMap<String, Arc<TableSlot>>>,
}

impl Tables {
    pub fn new(registry: Arc<Registry>, ncores: NonZeroUsize) -> Self {
        Self { registry, ncores, tables: KMutex::new(BTreeMap::new()) }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn slot(&self, name: &str) -> Result<Arc<TableSlot>, FwtError> {
        self.tables
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| FwtError::TableNotFound(name.to_string()))
    }

    fn active(&self, name: &str) -> Result<Arc<Ruleset>, FwtError> {
        self.slot(name)?
            .active()
            .ok_or_else(|| FwtError::TableNotFound(name.to_string()))
    }

    /// Validate and activate a table. The heavy lifting (the three
    /// validation passes, replica construction) happens before any
    /// lock is taken; only the final pointer swap excludes the packet
    /// path.
    pub fn load(&self, req: &LoadReq) -> Result<LoadResp, FwtError> {
        let layout = translate(&self.registry, req)?;
        let table = Arc::new(Ruleset::new(layout, self.ncores));

        let slot = self
            .tables
            .lock()
            .entry(req.name.clone())
            .or_insert_with(|| Arc::new(TableSlot::new()))
            .clone();

        match slot.replace(table.clone(), req.old_num_entries) {
            Ok((old, old_counters)) => {
                if let Some(old) = old {
                    old.retire(&self.registry);
                }
                Ok(LoadResp { old_counters })
            }
            Err(e) => {
                // The proposed table never became visible; release
                // the references it took during validation.
                table.retire(&self.registry);
                Err(e)
            }
        }
    }

    pub fn get_info(&self, req: &InfoReq) -> Result<InfoResp, FwtError> {
        let table = self.active(&req.name)?;

        Ok(InfoResp {
            name: req.name.clone(),
            valid_hooks: table.valid_hooks(),
            hook_entry: table.hook_entry_offsets(),
            underflow: table.underflow_offsets(),
            num_entries: table.num_entries() as u32,
            size: table.size() as u32,
        })
    }

    pub fn get_entries(
        &self,
        req: &EntriesReq,
    ) -> Result<EntriesResp, FwtError> {
        let slot = self.slot(&req.name)?;

        let Some((table, counters)) = slot.consistent_snapshot() else {
            return Err(FwtError::TableNotFound(req.name.clone()));
        };

        if req.size as usize != table.size() {
            return Err(FwtError::SizeMismatch {
                expected: req.size,
                actual: table.size() as u32,
            });
        }

        Ok(EntriesResp { blob: table.serialize(), counters })
    }

    pub fn add_counters(
        &self,
        req: &AddCountersReq,
    ) -> Result<NoResp, FwtError> {
        let table = self.active(&req.name)?;
        table.merge_deltas(&req.counters)?;
        Ok(NoResp::default())
    }

    pub fn dump(&self, req: &DumpReq) -> Result<DumpTableResp, FwtError> {
        let table = self.active(&req.name)?;

        Ok(DumpTableResp {
            name: req.name.clone(),
            valid_hooks: table.valid_hooks(),
            rules: table.dump(),
        })
    }

    /// The packet path. A nonexistent or empty table accepts.
    pub fn evaluate(
        &self,
        name: &str,
        core: usize,
        hook: Hook,
        pkt: &PacketMeta,
    ) -> Disposition {
        match self.slot(name) {
            Ok(slot) => slot.evaluate(core, hook, pkt),
            Err(_) => Disposition::Accept,
        }
    }

    /// The command envelope: decode the request, run the operation,
    /// encode the response.
    pub fn dispatch(&self, cmd: i32, bytes: &[u8]) -> Result<Vec<u8>, FwtError> {
        let cmd = TableCmd::try_from(cmd).map_err(|_| FwtError::BadCmd(cmd))?;

        match cmd {
            TableCmd::Load => run(bytes, |req| self.load(&req)),
            TableCmd::GetInfo => run(bytes, |req| self.get_info(&req)),
            TableCmd::GetEntries => run(bytes, |req| self.get_entries(&req)),
            TableCmd::AddCounters => run(bytes, |req| self.add_counters(&req)),
            TableCmd::DumpTable => run(bytes, |req| self.dump(&req)),
        }
    }
}

fn run<R, T, F>(bytes: &[u8], f: F) -> Result<Vec<u8>, FwtError>
where
    R: DeserializeOwned,
    T: CmdOk,
    F: FnOnce(R) -> Result<T, FwtError>,
{
    let req: R = postcard::from_bytes(bytes)
        .map_err(|e| FwtError::DeserCmdReq(e.to_string()))?;
    let resp = f(req)?;
    postcard::to_allocvec(&resp).map_err(|e| FwtError::SerCmdResp(e.to_string()))
}
