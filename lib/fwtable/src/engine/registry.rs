// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The extension registry.
//!
//! Match and target extensions are registered by name and resolved
//! exactly once, while a table is validated. Every resolved reference
//! holds a refcount on its extension; an extension cannot be
//! unregistered while any live table still points at it.

use super::packet::PacketMeta;
use crate::api::Disposition;
use crate::api::FwtError;
use crate::sync::KMutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The result of running one extension match against a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchOutcome {
    /// The match condition holds; continue with the next piece.
    Hit,
    /// The condition does not hold; fall through to the next rule.
    Miss,
    /// The extension demands the packet be dropped immediately,
    /// regardless of the rule's target.
    HardDrop,
}

/// A match extension: a named predicate over packet headers,
/// parameterized by the opaque blob stored in the rule.
pub trait MatchExt: Send + Sync {
    /// Check an instance's parameter blob at table-validation time.
    /// `hook_mask` is the complete set of hooks able to reach the
    /// rule, so an extension can refuse placements that make no sense
    /// (e.g. an ingress-interface condition on the output hook).
    fn validate(&self, hook_mask: u32, data: &[u8]) -> Result<(), String>;

    /// Run the predicate against a packet.
    fn is_match(&self, pkt: &PacketMeta, data: &[u8]) -> MatchOutcome;

    /// Release any per-instance state when the rule that carried this
    /// instance is torn down.
    fn destroy(&self, _data: &[u8]) {}
}

/// A target extension: a named terminal action. Returning a
/// [`Disposition`] is what makes extension targets terminal; there is
/// no value they could return to continue the walk.
pub trait TargetExt: Send + Sync {
    fn validate(&self, hook_mask: u32, data: &[u8]) -> Result<(), String>;

    /// Apply the target to a packet and dispose of it.
    fn exec(&self, pkt: &PacketMeta, data: &[u8]) -> Disposition;

    fn destroy(&self, _data: &[u8]) {}
}

struct Slot<T: ?Sized> {
    ext: Arc<T>,
    refcnt: u64,
}

/// The registry proper. One instance is shared by all tables that
/// should resolve against the same extension namespace.
pub struct Registry {
    matches: KMutex<BTreeMap<String, Slot<dyn MatchExt>>>,
    targets: KMutex<BTreeMap<String, Slot<dyn TargetExt>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            matches: KMutex::new(BTreeMap::new()),
            targets: KMutex::new(BTreeMap::new()),
        }
    }

    pub fn register_match(
        &self,
        name: &str,
        ext: Arc<dyn MatchExt>,
    ) -> Result<(), FwtError> {
        let mut map = self.matches.lock();
        if map.contains_key(name) {
            return Err(FwtError::ExtExists(name.to_string()));
        }
        map.insert(name.to_string(), Slot { ext, refcnt: 0 });
        Ok(())
    }

    pub fn register_target(
        &self,
        name: &str,
        ext: Arc<dyn TargetExt>,
    ) -> Result<(), FwtError> {
        let mut map = self.targets.lock();
        if map.contains_key(name) {
            return Err(FwtError::ExtExists(name.to_string()));
        }
        map.insert(name.to_string(), Slot { ext, refcnt: 0 });
        Ok(())
    }

    /// Remove a match extension. Fails while any live rule still
    /// references it.
    pub fn unregister_match(&self, name: &str) -> Result<(), FwtError> {
        let mut map = self.matches.lock();
        match map.get(name) {
            None => Err(FwtError::UnknownExt(name.to_string())),
            Some(slot) if slot.refcnt > 0 => {
                Err(FwtError::ExtInUse(name.to_string()))
            }
            Some(_) => {
                map.remove(name);
                Ok(())
            }
        }
    }

    pub fn unregister_target(&self, name: &str) -> Result<(), FwtError> {
        let mut map = self.targets.lock();
        match map.get(name) {
            None => Err(FwtError::UnknownExt(name.to_string())),
            Some(slot) if slot.refcnt > 0 => {
                Err(FwtError::ExtInUse(name.to_string()))
            }
            Some(_) => {
                map.remove(name);
                Ok(())
            }
        }
    }

    /// Resolve a match extension, taking a reference on it. Every
    /// successful take must be balanced by [`Registry::put_match`].
    pub fn take_match(&self, name: &str) -> Option<Arc<dyn MatchExt>> {
        let mut map = self.matches.lock();
        let slot = map.get_mut(name)?;
        slot.refcnt += 1;
        Some(slot.ext.clone())
    }

    pub fn take_target(&self, name: &str) -> Option<Arc<dyn TargetExt>> {
        let mut map = self.targets.lock();
        let slot = map.get_mut(name)?;
        slot.refcnt += 1;
        Some(slot.ext.clone())
    }

    /// Drop a reference taken by [`Registry::take_match`]. Dropping a
    /// reference on an unknown name is a bug in the caller's
    /// bookkeeping; it is logged and otherwise ignored.
    pub fn put_match(&self, name: &str) {
        let mut map = self.matches.lock();
        match map.get_mut(name) {
            Some(slot) if slot.refcnt > 0 => slot.refcnt -= 1,
            _ => {
                super::err!("put_match: unbalanced put for '{}'", name);
            }
        }
    }

    pub fn put_target(&self, name: &str) {
        let mut map = self.targets.lock();
        match map.get_mut(name) {
            Some(slot) if slot.refcnt > 0 => slot.refcnt -= 1,
            _ => {
                super::err!("put_target: unbalanced put for '{}'", name);
            }
        }
    }

    pub fn match_refcnt(&self, name: &str) -> Option<u64> {
        self.matches.lock().get(name).map(|s| s.refcnt)
    }

    pub fn target_refcnt(&self, name: &str) -> Option<u64> {
        self.targets.lock().get(name).map(|s| s.refcnt)
    }
}
