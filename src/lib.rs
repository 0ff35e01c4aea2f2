// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent dotfile deployment.
//!
//! Dotlink puts configuration files from a dotfile repository into place,
//! by symlink or by copy, as listed in the repository's
//! [manifest](config::Manifest). Anything already occupying a target is
//! backed up first, every run is recorded into the
//! [state store](store::StateStore), and any recorded run can be rolled
//! back to restore the file system to how it was before.

pub mod config;
pub mod deploy;
pub mod path;
pub mod store;

pub use config::Manifest;
pub use deploy::{
    model::{Action, ActionKind, DeploymentState, Mapping},
    plan::{Plan, Step},
    status::{Drift, StatusReport},
    DeployError, Deployer, PartialApply, PartialRollback, RollbackReport,
};
pub use store::StateStore;
