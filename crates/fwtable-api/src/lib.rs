// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Control-plane API types for the fwtable engine.
//!
//! These are the types a privileged caller exchanges with the rule
//! table engine. They are carried as postcard-serialized byte buffers
//! so that the same definitions work across any transport.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

pub mod cmd;
pub mod ip;

pub use cmd::*;
pub use ip::*;

/// The overall version of the API. Anytime a command is added,
/// removed, or modified, this number should increment, giving user
/// and engine a cheap way to verify they agree on the wire contract.
pub const API_VERSION: u64 = 3;

/// The number of hooks a table may attach to.
pub const HOOK_COUNT: usize = 5;

/// A point in packet processing at which a table chain may be
/// invoked.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Hook {
    PreRouting = 0,
    LocalIn = 1,
    Forward = 2,
    LocalOut = 3,
    PostRouting = 4,
}

impl Hook {
    pub const ALL: [Hook; HOOK_COUNT] = [
        Hook::PreRouting,
        Hook::LocalIn,
        Hook::Forward,
        Hook::LocalOut,
        Hook::PostRouting,
    ];

    /// The bit this hook occupies in a `valid_hooks` mask.
    pub const fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Hook::PreRouting => "prerouting",
            Hook::LocalIn => "input",
            Hook::Forward => "forward",
            Hook::LocalOut => "output",
            Hook::PostRouting => "postrouting",
        };

        write!(f, "{}", s)
    }
}

impl FromStr for Hook {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prerouting" => Ok(Hook::PreRouting),
            "input" => Ok(Hook::LocalIn),
            "forward" => Ok(Hook::Forward),
            "output" => Ok(Hook::LocalOut),
            "postrouting" => Ok(Hook::PostRouting),
            _ => Err(format!("invalid hook: {}", s)),
        }
    }
}

/// A terminal packet disposition.
///
/// This is the closed set of outcomes an evaluation may produce. The
/// control-flow verdicts (continue/jump/return) are internal to the
/// standard target and never escape the engine; an extension target
/// returns one of these, which is what makes "extension targets are
/// always terminal" a property of the type rather than a runtime
/// check.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Disposition {
    Accept,
    Drop,
    Queue,
}

impl Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Disposition::Accept => "accept",
            Disposition::Drop => "drop",
            Disposition::Queue => "queue",
        };

        write!(f, "{}", s)
    }
}
