// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner module - ansible-runner execution.

pub mod ansible;
pub mod extravars;
pub mod mock;
pub mod params;
pub mod process;
mod traits;

pub use ansible::PlaybookRunner;
pub use mock::{MockCall, MockRunner};
pub use params::Parameters;
pub use process::{RunHandle, RunnerProcess};
pub use traits::*;
