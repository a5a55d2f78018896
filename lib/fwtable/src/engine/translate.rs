// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The validator: turn an untrusted blob into an activatable rule
//! list, or reject it with no side effects.
//!
//! Three passes. The structural walk ([`super::arena`]) proves the
//! offsets. The reachability pass proves every chain reaches a
//! terminal verdict and computes each rule's hook mask. The semantic
//! pass decodes clauses and targets and resolves extensions against
//! the registry, unwinding every reference already taken if any rule
//! fails. Only after all three does anything become visible to the
//! packet path.

use super::arena::Arena;
use super::arena::EntrySkel;
use super::registry::Registry;
use super::rule::ExtRef;
use super::rule::IpClause;
use super::rule::RuleEntry;
use super::rule::RuleTarget;
use super::rule::StandardTarget;
use super::wire;
use super::wire::StdTargetPayload;
use crate::api::Disposition;
use crate::api::FwtError;
use crate::api::HOOK_COUNT;
use crate::api::Hook;
use crate::api::LoadReq;
use zerocopy::FromBytes;

/// A validated table layout, ready to be wrapped in per-core state.
pub struct TableLayout {
    pub valid_hooks: u32,
    /// Entry index each active hook starts at.
    pub hook_entry: [Option<usize>; HOOK_COUNT],
    /// Entry index of each active hook's default-policy rule.
    pub underflow: [Option<usize>; HOOK_COUNT],
    pub entries: Vec<RuleEntry>,
}

/// The standard target decoded just far enough for the reachability
/// pass, which reasons only about verdicts and offsets.
enum PreTarget {
    Std { verdict: i32, jump: Option<usize> },
    Ext,
}

pub fn translate(
    reg: &Registry,
    req: &LoadReq,
) -> Result<TableLayout, FwtError> {
    if req.blob.len() != req.size as usize {
        return Err(FwtError::BadLen {
            declared: req.size,
            actual: req.blob.len() as u32,
        });
    }

    let arena = Arena::parse(&req.blob, req.num_entries as usize)?;
    let n = arena.entries.len();

    // Hooks outside the known set can never be evaluated, so bits
    // beyond them are ignored rather than rejected.
    let valid_hooks = req.valid_hooks & Hook::ALL.iter().fold(0, |m, h| {
        m | h.bit()
    });

    let mut hook_entry = [None; HOOK_COUNT];
    let mut underflow = [None; HOOK_COUNT];

    for hook in Hook::ALL {
        if valid_hooks & hook.bit() == 0 {
            continue;
        }

        let entry_off = req.hook_entry[hook.index()] as usize;
        let under_off = req.underflow[hook.index()] as usize;

        hook_entry[hook.index()] =
            Some(arena.index_at(entry_off).ok_or(FwtError::BadHookOffset {
                hook: hook.index() as u32,
                offset: entry_off as u32,
            })?);
        underflow[hook.index()] =
            Some(arena.index_at(under_off).ok_or(FwtError::BadHookOffset {
                hook: hook.index() as u32,
                offset: under_off as u32,
            })?);
    }

    // Decode every clause and standard target up front. Nothing here
    // touches the registry, so failure needs no unwinding.
    let mut clauses = Vec::with_capacity(n);
    let mut pre = Vec::with_capacity(n);

    for (i, skel) in arena.entries.iter().enumerate() {
        let clause = IpClause::from_hdr(&skel.hdr)
            .map_err(|_| FwtError::BadFlags { index: i as u32 })?;
        pre.push(decode_std_target(&arena, skel, i)?);
        clauses.push(clause);
    }

    let uncond: Vec<bool> = arena
        .entries
        .iter()
        .zip(clauses.iter())
        .map(|(skel, clause)| clause.is_empty() && skel.matches.is_empty())
        .collect();

    for hook in Hook::ALL {
        if let Some(idx) = underflow[hook.index()] {
            check_underflow(&arena.entries[idx], &pre[idx], uncond[idx], hook)?;
        }
    }

    let hook_masks =
        mark_reachable(valid_hooks, &hook_entry, &underflow, &uncond, &pre, n)?;

    if let Some(i) = hook_masks.iter().position(|m| *m == 0) {
        return Err(FwtError::Unreachable { index: i as u32 });
    }

    // Semantic pass. From here on references are being taken against
    // the registry, so the first failure unwinds everything resolved
    // so far before surfacing.
    let mut entries: Vec<RuleEntry> = Vec::with_capacity(n);

    for (i, skel) in arena.entries.iter().enumerate() {
        let next_idx = if i + 1 < n { Some(i + 1) } else { None };
        let built = build_entry(
            reg,
            skel,
            i,
            hook_masks[i],
            &pre[i],
            clauses[i].clone(),
            next_idx,
        );

        match built {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                teardown(reg, &entries);
                return Err(e);
            }
        }
    }

    Ok(TableLayout { valid_hooks, hook_entry, underflow, entries })
}

/// Release every extension reference held by `entries`, invoking
/// destructors. Used both for unwinding a failed load and for
/// retiring a displaced table.
pub fn teardown(reg: &Registry, entries: &[RuleEntry]) {
    for entry in entries {
        for m in &entry.matches {
            m.ext.destroy(&m.data);
            reg.put_match(&m.name);
        }

        if let RuleTarget::Ext(t) = &entry.target {
            t.ext.destroy(&t.data);
            reg.put_target(&t.name);
        }
    }
}

fn decode_std_target(
    arena: &Arena,
    skel: &EntrySkel,
    index: usize,
) -> Result<PreTarget, FwtError> {
    if !skel.target.hdr.is_standard() {
        return Ok(PreTarget::Ext);
    }

    if usize::from(skel.target.hdr.len.get()) != wire::STD_TARGET_SIZE {
        return Err(FwtError::BadExtLen {
            offset: skel.target.offset as u32,
            len: skel.target.hdr.len.get() as u32,
        });
    }

    let payload = StdTargetPayload::read_from_bytes(&skel.target.data)
        .map_err(|_| FwtError::BadOffset {
            offset: skel.target.offset as u32,
        })?;
    let verdict = payload.verdict.get();

    if verdict >= 0 {
        let jump = arena.index_at(verdict as usize).ok_or(
            FwtError::BadJumpTarget {
                index: index as u32,
                target: verdict as u32,
            },
        )?;
        return Ok(PreTarget::Std { verdict, jump: Some(jump) });
    }

    if verdict < wire::VERDICT_RETURN {
        return Err(FwtError::BadVerdict { index: index as u32, verdict });
    }

    Ok(PreTarget::Std { verdict, jump: None })
}

/// An underflow rule is a hook's default policy: it must apply to
/// every packet and must carry an unconditional terminal verdict, so
/// that "no rule matched" always has a defined outcome.
fn check_underflow(
    skel: &EntrySkel,
    pre: &PreTarget,
    uncond: bool,
    hook: Hook,
) -> Result<(), FwtError> {
    let err = FwtError::BadUnderflow {
        hook: hook.index() as u32,
        offset: skel.offset as u32,
    };

    if !uncond {
        return Err(err);
    }

    match pre {
        PreTarget::Std { verdict, jump: None }
            if *verdict != wire::VERDICT_RETURN =>
        {
            Ok(())
        }
        _ => Err(err),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// For each active hook, depth-first walk every path evaluation could
/// take from the hook's entry point, proving it reaches a terminal
/// verdict without revisiting a rule, and recording the hook in each
/// visited rule's reachability mask.
///
/// The successors of a rule:
/// - a standard jump reaches its target, and also its fallthrough
///   (the continuation a later RETURN pops back to);
/// - an unconditional standard terminal or RETURN ends the path;
/// - everything else (conditional rules, extension targets) reaches
///   its fallthrough.
///
/// A hook's underflow is a root of its own: a RETURN at the top level
/// lands there directly, so it is reachable even when no fallthrough
/// or jump leads to it.
fn mark_reachable(
    valid_hooks: u32,
    hook_entry: &[Option<usize>; HOOK_COUNT],
    underflow: &[Option<usize>; HOOK_COUNT],
    uncond: &[bool],
    pre: &[PreTarget],
    n: usize,
) -> Result<Vec<u32>, FwtError> {
    let mut masks = vec![0u32; n];

    let succs = |i: usize, hook: Hook| -> Result<Vec<usize>, FwtError> {
        let next = if i + 1 < n { Some(i + 1) } else { None };

        match &pre[i] {
            PreTarget::Std { verdict, jump: Some(t) } => {
                let Some(next) = next else {
                    return Err(FwtError::BadJumpTarget {
                        index: i as u32,
                        target: *verdict as u32,
                    });
                };
                Ok(vec![*t, next])
            }
            PreTarget::Std { jump: None, .. } if uncond[i] => Ok(vec![]),
            _ => match next {
                Some(next) => Ok(vec![next]),
                None => Err(FwtError::Unterminated {
                    hook: hook.index() as u32,
                    index: i as u32,
                }),
            },
        }
    };

    for hook in Hook::ALL {
        if valid_hooks & hook.bit() == 0 {
            continue;
        }

        let mut color = vec![Color::White; n];
        let mut stack: Vec<(usize, Vec<usize>, usize)> = Vec::new();

        let roots = [hook_entry[hook.index()], underflow[hook.index()]];
        for start in roots.into_iter().flatten() {
            if color[start] != Color::White {
                continue;
            }

            color[start] = Color::Gray;
            masks[start] |= hook.bit();
            stack.push((start, succs(start, hook)?, 0));

            loop {
                let advance = {
                    let Some((idx, succ, cursor)) = stack.last_mut() else {
                        break;
                    };

                    if *cursor < succ.len() {
                        let s = succ[*cursor];
                        *cursor += 1;
                        Some(s)
                    } else {
                        color[*idx] = Color::Black;
                        None
                    }
                };

                match advance {
                    None => {
                        stack.pop();
                    }
                    Some(s) => match color[s] {
                        Color::Gray => {
                            return Err(FwtError::Loop {
                                hook: hook.index() as u32,
                                index: s as u32,
                            });
                        }
                        Color::Black => (),
                        Color::White => {
                            color[s] = Color::Gray;
                            masks[s] |= hook.bit();
                            stack.push((s, succs(s, hook)?, 0));
                        }
                    },
                }
            }
        }
    }

    Ok(masks)
}

fn build_entry(
    reg: &Registry,
    skel: &EntrySkel,
    index: usize,
    hook_mask: u32,
    pre: &PreTarget,
    clause: IpClause,
    next_idx: Option<usize>,
) -> Result<RuleEntry, FwtError> {
    let mut matches = Vec::with_capacity(skel.matches.len());

    // Partially resolved matches of this entry are unwound here; the
    // caller unwinds whole entries already built.
    let unwind_matches = |matches: &[super::rule::MatchRef]| {
        for m in matches {
            m.ext.destroy(&m.data);
            reg.put_match(&m.name);
        }
    };

    for piece in &skel.matches {
        let name = piece.hdr.name_str();

        let Some(ext) = reg.take_match(&name) else {
            unwind_matches(&matches);
            return Err(FwtError::UnknownMatch { index: index as u32, name });
        };

        if let Err(msg) = ext.validate(hook_mask, &piece.data) {
            reg.put_match(&name);
            unwind_matches(&matches);
            return Err(FwtError::ExtValidate {
                index: index as u32,
                name,
                msg,
            });
        }

        matches.push(ExtRef { name, data: piece.data.clone(), ext });
    }

    let target = match pre {
        PreTarget::Std { verdict, jump } => {
            let std = match (*verdict, jump) {
                (v, Some(idx)) => {
                    StandardTarget::Jump { idx: *idx, off: v as u32 }
                }
                (wire::VERDICT_DROP, None) => {
                    StandardTarget::Verdict(Disposition::Drop)
                }
                (wire::VERDICT_ACCEPT, None) => {
                    StandardTarget::Verdict(Disposition::Accept)
                }
                (wire::VERDICT_QUEUE, None) => {
                    StandardTarget::Verdict(Disposition::Queue)
                }
                (wire::VERDICT_RETURN, None) => StandardTarget::Return,
                (v, None) => {
                    // decode_std_target already rejected this.
                    unwind_matches(&matches);
                    return Err(FwtError::BadVerdict {
                        index: index as u32,
                        verdict: v,
                    });
                }
            };

            RuleTarget::Standard(std)
        }

        PreTarget::Ext => {
            let name = skel.target.hdr.name_str();

            let Some(ext) = reg.take_target(&name) else {
                unwind_matches(&matches);
                return Err(FwtError::UnknownTarget {
                    index: index as u32,
                    name,
                });
            };

            if let Err(msg) = ext.validate(hook_mask, &skel.target.data) {
                reg.put_target(&name);
                unwind_matches(&matches);
                return Err(FwtError::ExtValidate {
                    index: index as u32,
                    name,
                    msg,
                });
            }

            RuleTarget::Ext(ExtRef {
                name,
                data: skel.target.data.clone(),
                ext,
            })
        }
    };

    Ok(RuleEntry {
        clause,
        matches,
        target,
        offset: skel.offset,
        target_offset: skel.target_offset(),
        next_offset: skel.next_offset(),
        next_idx,
        hook_mask,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::build::EntryBuilder;
    use crate::engine::build::TableBuilder;
    use crate::engine::registry::MatchExt;
    use crate::engine::registry::MatchOutcome;
    use crate::engine::rule::StandardTarget;
    use crate::engine::wire::VERDICT_ACCEPT;
    use crate::engine::wire::VERDICT_DROP;
    use crate::engine::wire::VERDICT_RETURN;
    use std::sync::Arc;

    struct YesMatch {}

    impl MatchExt for YesMatch {
        fn validate(
            &self,
            _hook_mask: u32,
            _data: &[u8],
        ) -> Result<(), String> {
            Ok(())
        }

        fn is_match(
            &self,
            _pkt: &crate::engine::packet::PacketMeta,
            _data: &[u8],
        ) -> MatchOutcome {
            MatchOutcome::Hit
        }
    }

    struct NoMatch {}

    impl MatchExt for NoMatch {
        fn validate(
            &self,
            _hook_mask: u32,
            _data: &[u8],
        ) -> Result<(), String> {
            Err("bad parameters".to_string())
        }

        fn is_match(
            &self,
            _pkt: &crate::engine::packet::PacketMeta,
            _data: &[u8],
        ) -> MatchOutcome {
            MatchOutcome::Hit
        }
    }

    fn single_hook(entries: Vec<EntryBuilder>, under: usize) -> LoadReq {
        let mut tb = TableBuilder::new("test");
        for e in entries {
            tb = tb.entry(e);
        }
        tb.hook(Hook::LocalIn, 0, under).build()
    }

    #[test]
    fn minimal_table() {
        let req = single_hook(
            vec![EntryBuilder::new().verdict(VERDICT_ACCEPT)],
            0,
        );

        let reg = Registry::new();
        let layout = translate(&reg, &req).unwrap();
        assert_eq!(layout.entries.len(), 1);
        assert_eq!(layout.hook_entry[Hook::LocalIn.index()], Some(0));
        assert_eq!(layout.entries[0].hook_mask, Hook::LocalIn.bit());
    }

    #[test]
    fn jump_and_return_resolve() {
        // 0: jump -> 2, 1: accept (underflow), 2: return
        let req = single_hook(
            vec![
                EntryBuilder::new().jump_to(2),
                EntryBuilder::new().verdict(VERDICT_ACCEPT),
                EntryBuilder::new().verdict(VERDICT_RETURN),
            ],
            1,
        );

        let reg = Registry::new();
        let layout = translate(&reg, &req).unwrap();

        match layout.entries[0].target {
            RuleTarget::Standard(StandardTarget::Jump { idx, .. }) => {
                assert_eq!(idx, 2);
            }
            ref t => panic!("expected jump, got {:?}", t),
        }

        // Every entry reachable from the single hook.
        for e in &layout.entries {
            assert_eq!(e.hook_mask, Hook::LocalIn.bit());
        }
    }

    #[test]
    fn self_jump_is_a_loop() {
        let req = single_hook(
            vec![
                EntryBuilder::new().jump_to(0),
                EntryBuilder::new().verdict(VERDICT_DROP),
            ],
            1,
        );

        let reg = Registry::new();
        assert!(matches!(
            translate(&reg, &req),
            Err(FwtError::Loop { index: 0, .. }),
        ));
    }

    #[test]
    fn two_entry_cycle() {
        let req = single_hook(
            vec![
                EntryBuilder::new().jump_to(1),
                EntryBuilder::new().jump_to(0),
                EntryBuilder::new().verdict(VERDICT_DROP),
            ],
            2,
        );

        let reg = Registry::new();
        assert!(matches!(translate(&reg, &req), Err(FwtError::Loop { .. })));
    }

    #[test]
    fn fallthrough_past_end() {
        // The hook starts at the final entry, which is conditional:
        // its "no match" continuation runs off the table.
        let req = TableBuilder::new("test")
            .entry(EntryBuilder::new().verdict(VERDICT_ACCEPT))
            .entry(EntryBuilder::new().proto(6).verdict(VERDICT_DROP))
            .hook(Hook::LocalIn, 1, 0)
            .build();

        let reg = Registry::new();
        assert!(matches!(
            translate(&reg, &req),
            Err(FwtError::Unterminated { index: 1, .. }),
        ));
    }

    #[test]
    fn unreachable_entry() {
        // Entry 1 sits behind an unconditional accept and nothing
        // jumps to it.
        let req = single_hook(
            vec![
                EntryBuilder::new().verdict(VERDICT_ACCEPT),
                EntryBuilder::new().verdict(VERDICT_DROP),
            ],
            0,
        );

        let reg = Registry::new();
        assert!(matches!(
            translate(&reg, &req),
            Err(FwtError::Unreachable { index: 1 }),
        ));
    }

    #[test]
    fn underflow_reached_only_by_return() {
        // Entry 0 returns from the top level, which lands on the
        // underflow; no fallthrough or jump reaches entry 1, yet the
        // table is valid and entry 1 carries the hook in its mask.
        let req = single_hook(
            vec![
                EntryBuilder::new().verdict(VERDICT_RETURN),
                EntryBuilder::new().verdict(VERDICT_ACCEPT),
            ],
            1,
        );

        let reg = Registry::new();
        let layout = translate(&reg, &req).unwrap();
        assert_eq!(layout.underflow[Hook::LocalIn.index()], Some(1));
        assert_eq!(layout.entries[0].hook_mask, Hook::LocalIn.bit());
        assert_eq!(layout.entries[1].hook_mask, Hook::LocalIn.bit());
    }

    #[test]
    fn conditional_underflow_rejected() {
        let req = single_hook(
            vec![
                EntryBuilder::new().proto(6).verdict(VERDICT_ACCEPT),
                EntryBuilder::new().verdict(VERDICT_DROP),
            ],
            0,
        );

        let reg = Registry::new();
        assert!(matches!(
            translate(&reg, &req),
            Err(FwtError::BadUnderflow { .. }),
        ));
    }

    #[test]
    fn return_underflow_rejected() {
        let req = single_hook(
            vec![EntryBuilder::new().verdict(VERDICT_RETURN)],
            0,
        );

        let reg = Registry::new();
        assert!(matches!(
            translate(&reg, &req),
            Err(FwtError::BadUnderflow { .. }),
        ));
    }

    #[test]
    fn bad_hook_offset() {
        let req = TableBuilder::new("test")
            .entry(EntryBuilder::new().verdict(VERDICT_ACCEPT))
            .hook_raw(Hook::LocalIn, 4, 0)
            .build();

        let reg = Registry::new();
        assert!(matches!(
            translate(&reg, &req),
            Err(FwtError::BadHookOffset { offset: 4, .. }),
        ));
    }

    #[test]
    fn bad_verdict_code() {
        let req = single_hook(
            vec![EntryBuilder::new().verdict(-9)],
            0,
        );

        let reg = Registry::new();
        assert!(matches!(
            translate(&reg, &req),
            Err(FwtError::BadVerdict { index: 0, verdict: -9 }),
        ));
    }

    #[test]
    fn jump_off_boundary() {
        let req = single_hook(
            vec![
                EntryBuilder::new().jump_raw(8),
                EntryBuilder::new().verdict(VERDICT_ACCEPT),
            ],
            1,
        );

        let reg = Registry::new();
        assert!(matches!(
            translate(&reg, &req),
            Err(FwtError::BadJumpTarget { index: 0, target: 8 }),
        ));
    }

    #[test]
    fn unknown_match_rejected() {
        let req = single_hook(
            vec![
                EntryBuilder::new()
                    .match_ext("nosuch", &[])
                    .verdict(VERDICT_ACCEPT),
                EntryBuilder::new().verdict(VERDICT_DROP),
            ],
            1,
        );

        let reg = Registry::new();
        assert!(matches!(
            translate(&reg, &req),
            Err(FwtError::UnknownMatch { index: 0, ref name })
                if name == "nosuch",
        ));
    }

    #[test]
    fn validator_rejection_unwinds_refcounts() {
        let reg = Registry::new();
        reg.register_match("yes", Arc::new(YesMatch {})).unwrap();
        reg.register_match("no", Arc::new(NoMatch {})).unwrap();

        // Entry 0's "yes" resolves and takes a reference; entry 1's
        // "no" then declines. The whole load fails and both
        // references must be released.
        let req = single_hook(
            vec![
                EntryBuilder::new()
                    .match_ext("yes", &[1, 2])
                    .verdict(VERDICT_ACCEPT),
                EntryBuilder::new()
                    .match_ext("no", &[])
                    .verdict(VERDICT_DROP),
                EntryBuilder::new().verdict(VERDICT_ACCEPT),
            ],
            2,
        );

        assert!(matches!(
            translate(&reg, &req),
            Err(FwtError::ExtValidate { index: 1, .. }),
        ));

        assert_eq!(reg.match_refcnt("yes"), Some(0));
        assert_eq!(reg.match_refcnt("no"), Some(0));
    }

    #[test]
    fn successful_load_holds_references() {
        let reg = Registry::new();
        reg.register_match("yes", Arc::new(YesMatch {})).unwrap();

        let req = single_hook(
            vec![
                EntryBuilder::new()
                    .match_ext("yes", &[7])
                    .verdict(VERDICT_DROP),
                EntryBuilder::new().verdict(VERDICT_ACCEPT),
            ],
            1,
        );

        let layout = translate(&reg, &req).unwrap();
        assert_eq!(reg.match_refcnt("yes"), Some(1));

        teardown(&reg, &layout.entries);
        assert_eq!(reg.match_refcnt("yes"), Some(0));
    }
}
