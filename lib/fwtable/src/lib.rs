// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A packet-classification and verdict engine.
//!
//! This crate implements the firewall rule-table subsystem: a
//! defensively validated, offset-addressed rule blob is translated
//! into an active table, packets are classified against the table on
//! a lock-light per-core path, and the table can be atomically
//! replaced while classification is in flight. See
//! [`engine::translate`] for the loader, [`engine::table`] for the
//! evaluation and replacement machinery, and [`engine::ioctl`] for
//! the control-plane surface.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod api;
pub mod engine;
pub mod print;
pub mod sync;
