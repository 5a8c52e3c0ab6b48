// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Model module - access to the agent that runs this operator.

pub mod hook_tools;
pub mod mock;
mod traits;

pub use hook_tools::HookTools;
pub use mock::MockModel;
pub use traits::*;
