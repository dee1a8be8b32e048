// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External CLI collaborators.
//!
//! The broker drives helm and kubectl as black boxes through the
//! [`CommandRunner`] trait. Arguments are always discrete tokens.

pub mod helm;
pub mod kubectl;
pub mod mock;
mod process;
mod traits;

pub use helm::Helm;
pub use kubectl::{Kubectl, ObjectKeyRef, ValueFrom};
pub use mock::{Invocation, MockCommandRunner};
pub use process::ProcessRunner;
pub use traits::*;
