// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The rule-table engine.

pub mod arena;
pub mod ioctl;
pub mod packet;
pub mod registry;
pub mod rule;
pub mod table;
pub mod translate;
pub mod wire;

#[cfg(any(test, feature = "test-help"))]
pub mod build;

#[macro_export]
macro_rules! dbg_macro {
    ($s:tt) => {
        println!($s);
    };
    ($s:tt, $($arg:tt)*) => {
        println!($s, $($arg)*);
    };
}

#[macro_export]
macro_rules! err_macro {
    ($s:tt) => {
        println!(concat!("ERROR: ", $s));
    };
    ($s:tt, $($arg:tt)*) => {
        println!(concat!("ERROR: ", $s), $($arg)*);
    };
}

pub use dbg_macro as dbg;
pub use err_macro as err;
