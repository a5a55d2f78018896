// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print command responses in human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both admin tooling and integration tests.

use crate::api::DumpTableResp;
use crate::api::Hook;
use crate::api::RuleDump;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a [`DumpTableResp`].
pub fn print_table(resp: &DumpTableResp) -> std::io::Result<()> {
    print_table_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpTableResp`] into a given writer.
pub fn print_table_into(
    writer: &mut impl Write,
    resp: &DumpTableResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(
        t,
        "Table {} (hooks: {})",
        resp.name,
        hooks_str(resp.valid_hooks),
    )?;
    write_hr(&mut t)?;
    print_rule_header(&mut t)?;

    for rule in &resp.rules {
        print_rule(&mut t, rule)?;
    }

    writeln!(t)?;
    t.flush()
}

fn print_rule_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "IDX\tOFF\tHOOKS\tCLAUSE\tMATCHES\tTARGET\tHITS\tBYTES")
}

fn print_rule(t: &mut impl Write, rule: &RuleDump) -> std::io::Result<()> {
    let matches = if rule.matches.is_empty() {
        "-".to_string()
    } else {
        rule.matches.join(",")
    };

    writeln!(
        t,
        "{}\t{:#x}\t{}\t{}\t{}\t{}\t{}\t{}",
        rule.index,
        rule.offset,
        hooks_str(rule.hook_mask),
        rule.clause,
        matches,
        rule.target,
        rule.hits,
        rule.bytes,
    )
}

fn hooks_str(mask: u32) -> String {
    let names: Vec<String> = Hook::ALL
        .iter()
        .filter(|h| mask & h.bit() != 0)
        .map(Hook::to_string)
        .collect();

    if names.is_empty() { "-".to_string() } else { names.join(",") }
}

fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{}", "=".repeat(70))
}
