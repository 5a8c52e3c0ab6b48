// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervisor module - control of the workload container's service manager.
//!
//! - `PebbleClient`: Pebble's HTTP API on its unix socket (production)
//! - `MockSupervisor`: in-memory plan and files (testing)

pub mod mock;
pub mod pebble;
mod traits;

pub use mock::{ExecBehaviour, MockSupervisor};
pub use pebble::PebbleClient;
pub use traits::*;
