// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Rollback of recorded deployment states.

use crate::deploy::{
    fsops::{ensure_parent_dirs, occupied, FileOps},
    model::{Action, DeploymentState, TIMESTAMP_FORMAT},
    status::Drift,
    DeployError, Deployer, Result,
};

use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Outcome of rolling back a deployment state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    /// Deployed targets that were removed.
    pub removed: Vec<PathBuf>,

    /// Targets whose backups were moved back into place.
    pub restored: Vec<PathBuf>,

    /// Drifted targets that were moved aside, paired with where they went.
    pub preserved: Vec<(PathBuf, PathBuf)>,

    /// Recorded backups that no longer exist.
    pub missing_backups: Vec<PathBuf>,
}

impl RollbackReport {
    /// Check if every recorded backup was restored.
    pub fn is_complete(&self) -> bool {
        self.missing_backups.is_empty()
    }

    /// Turn an incomplete rollback into an error.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::RollbackIncomplete`] if any backup was missing.
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(DeployError::RollbackIncomplete {
                missing: self.missing_backups,
            })
        }
    }
}

impl<F> Deployer<F>
where
    F: FileOps,
{
    /// Roll back a deployment state.
    ///
    /// Replays recorded actions in reverse. Each deployed target is removed,
    /// or moved aside if it drifted, and its backup is moved back into
    /// place. Missing backups are logged and collected into the report. A
    /// drifted target whose backup is missing stays where it is, since
    /// nothing would take its place. Deleting the state record afterwards is
    /// left to the caller.
    ///
    /// # Errors
    ///
    /// - Return [`PartialRollback`] holding the actions not yet rolled back
    ///   if a target cannot be inspected, a target cannot be removed, or a
    ///   backup cannot be moved back.
    #[instrument(skip(self, state), fields(profile = %state.profile, id = %state.id), level = "debug")]
    pub fn rollback(&self, state: &DeploymentState) -> Result<RollbackReport, PartialRollback> {
        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut report = RollbackReport::default();

        for (index, action) in state.actions.iter().enumerate().rev() {
            if let Err(error) = self.undo(&state.profile, action, &stamp, &mut report) {
                // INVARIANT: The failed action stays, its target or backup is still in play.
                let mut remaining = state.clone();
                remaining.actions.truncate(index + 1);
                return Err(PartialRollback {
                    remaining,
                    report,
                    error,
                });
            }
        }

        if report.is_complete() {
            info!("rolled back profile {:?} run {}", state.profile, state.id);
        } else {
            warn!(
                "rolled back profile {:?} run {} with {} missing backup(s)",
                state.profile,
                state.id,
                report.missing_backups.len()
            );
        }

        Ok(report)
    }

    fn undo(
        &self,
        profile: &str,
        action: &Action,
        stamp: &str,
        report: &mut RollbackReport,
    ) -> Result<()> {
        let backup = match &action.backup_path {
            Some(path) => {
                let present = occupied(path).map_err(|source| DeployError::Inspect {
                    source,
                    path: path.clone(),
                })?;
                Some((path, present))
            }
            None => None,
        };

        let keep_drifted = matches!(backup, Some((_, false)));
        self.clear_target(profile, action, keep_drifted, stamp, report)?;

        match backup {
            Some((path, true)) => self.restore_backup(action, path, report)?,
            Some((path, false)) => {
                warn!(
                    "backup {:?} not found, cannot restore {:?}",
                    path.display(),
                    action.target_path.display()
                );
                report.missing_backups.push(path.clone());
            }
            None => {}
        }

        self.remove_created_dirs(action);

        Ok(())
    }

    fn clear_target(
        &self,
        profile: &str,
        action: &Action,
        keep_drifted: bool,
        stamp: &str,
        report: &mut RollbackReport,
    ) -> Result<()> {
        let target = &action.target_path;
        let restore = |source| DeployError::Restore {
            source,
            target: target.clone(),
        };

        let drift = Drift::inspect(action).map_err(|source| DeployError::Inspect {
            source,
            path: target.clone(),
        })?;

        match drift {
            Drift::Missing => debug!("{:?} already gone", target.display()),
            Drift::InSync => {
                self.ops.remove_all(target).map_err(restore)?;
                info!("removed {:?}", target.display());
                report.removed.push(target.clone());
            }
            drift if keep_drifted => {
                warn!(
                    "{:?} {drift} since deployment, left it in place",
                    target.display()
                );
            }
            drift => {
                let aside = self
                    .unique_backup_path(profile, target, "drift", stamp)
                    .map_err(restore)?;
                ensure_parent_dirs(&self.ops, &aside).map_err(restore)?;
                self.ops.rename(target, &aside).map_err(restore)?;
                warn!(
                    "{:?} {drift} since deployment, moved it to {:?}",
                    target.display(),
                    aside.display()
                );
                report.preserved.push((target.clone(), aside));
            }
        }

        Ok(())
    }

    fn restore_backup(
        &self,
        action: &Action,
        backup: &Path,
        report: &mut RollbackReport,
    ) -> Result<()> {
        let target = &action.target_path;
        let restore = |source| DeployError::Restore {
            source,
            target: target.clone(),
        };

        // INVARIANT: Backup is only consumed by a successful move into place.
        ensure_parent_dirs(&self.ops, target).map_err(restore)?;
        self.ops.rename(backup, target).map_err(restore)?;
        info!("restored {:?} from {:?}", target.display(), backup.display());
        report.restored.push(target.clone());

        Ok(())
    }

    fn remove_created_dirs(&self, action: &Action) {
        for dir in action.created_dirs.iter().rev() {
            if !dir.is_dir() {
                continue;
            }

            match self.ops.remove_dir(dir) {
                Ok(()) => debug!("removed directory {:?}", dir.display()),
                Err(err) => debug!("kept directory {:?}: {err}", dir.display()),
            }
        }
    }
}

/// Rollback stopped partway through a deployment state.
///
/// Holds the actions that were not rolled back yet, so the state record can
/// be rewritten to match and the rollback retried later.
#[derive(Debug, thiserror::Error)]
#[error(
    "rollback of profile {:?} run {} stopped with {} action(s) left",
    remaining.profile,
    remaining.id,
    remaining.actions.len()
)]
pub struct PartialRollback {
    /// Recorded state trimmed to the actions still deployed.
    pub remaining: DeploymentState,

    /// What was undone before the failure.
    pub report: RollbackReport,

    /// Failure that stopped rollback.
    #[source]
    pub error: DeployError,
}
