// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent deployment of configuration files.
//!
//! A __profile__ is a named listing of source to target mappings, e.g., all
//! files that make up a Hyprland setup. Deploying a profile puts each
//! source at its target, either as a symlink or as a copy.
//!
//! # Deployment Lifecycle
//!
//! Deployment happens in two phases. First, a [`Plan`] is drafted by
//! inspecting each target: a target that already holds its source is left
//! alone, a missing target is created directly, and a target occupied by
//! anything else is backed up before it gets replaced. Planning never
//! writes anything, so a plan doubles as a dry run.
//!
//! Second, the plan is applied. Every change made is recorded as an
//! [`Action`] in a [`DeploymentState`]. Applying fails fast: the first
//! unrecoverable error stops the run, and the partial state is handed back
//! so it can still be persisted and rolled back later.
//!
//! Re-running deployment after a successful run produces an empty plan, so
//! nothing new gets backed up or recorded.
//!
//! # Rollback
//!
//! Rolling back replays a state's actions in reverse: deployed targets are
//! removed, and backups are moved back into place. Targets that drifted
//! since deployment are moved aside instead of being deleted. Backups that
//! went missing are reported, but do not stop the rest of the rollback. A
//! rollback that fails partway hands back the actions it did not get to.
//!
//! # See Also
//!
//! 1. [`StateStore`](crate::store::StateStore)
//! 2. [`Manifest`](crate::config::Manifest)

pub mod fsops;
pub mod model;
pub mod plan;
pub mod rollback;
pub mod status;

use crate::deploy::{
    fsops::{digest, ensure_parent_dirs, occupied, unique_path, FileOps, HostFs},
    model::{Action, ActionKind, DeploymentState, Mapping, TIMESTAMP_FORMAT},
    plan::{Plan, PlanError, PlannedAction, Step},
    status::{StatusEntry, StatusReport},
};

use chrono::{Local, Utc};
use indicatif::ProgressBar;
use std::{
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

pub use rollback::{PartialRollback, RollbackReport};

/// Deploys plans and rolls back recorded deployment states.
///
/// All mutations go through a [`FileOps`] implementation, which defaults to
/// the host file system.
#[derive(Debug, Clone)]
pub struct Deployer<F = HostFs>
where
    F: FileOps,
{
    backup_dir: PathBuf,
    ops: F,
}

impl Deployer<HostFs> {
    /// Construct new deployer on the host file system.
    ///
    /// Backups are written under `backup_dir`, one subdirectory per profile.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self::with_ops(backup_dir, HostFs)
    }
}

impl<F> Deployer<F>
where
    F: FileOps,
{
    /// Construct new deployer with custom file operations.
    pub fn with_ops(backup_dir: impl Into<PathBuf>, ops: F) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            ops,
        }
    }

    /// Directory backups are written to.
    pub fn backup_dir(&self) -> &Path {
        self.backup_dir.as_path()
    }

    /// Plan deployment of mappings for a profile.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Plan`] if a source is missing or a target
    ///   cannot be inspected.
    pub fn plan(
        &self,
        profile: impl Into<String>,
        mappings: impl IntoIterator<Item = Mapping>,
    ) -> Result<Plan> {
        Ok(plan::plan(profile, mappings)?)
    }

    /// Apply a plan.
    ///
    /// # Errors
    ///
    /// - Return [`PartialApply`] holding the actions applied so far if any
    ///   action fails.
    pub fn apply(&self, plan: &Plan) -> Result<DeploymentState, PartialApply> {
        self.apply_with_progress(plan, &ProgressBar::hidden())
    }

    /// Apply a plan while reporting progress through a progress bar.
    ///
    /// # Errors
    ///
    /// - Return [`PartialApply`] holding the actions applied so far if any
    ///   action fails.
    #[instrument(skip(self, plan, bar), fields(profile = %plan.profile), level = "debug")]
    pub fn apply_with_progress(
        &self,
        plan: &Plan,
        bar: &ProgressBar,
    ) -> Result<DeploymentState, PartialApply> {
        let mut state = DeploymentState::new(plan.profile.as_str());
        let stamp = state
            .created_at
            .with_timezone(&Local)
            .format(TIMESTAMP_FORMAT)
            .to_string();

        bar.set_length(plan.pending().count() as u64);
        for planned in plan.pending() {
            bar.set_message(planned.mapping.target.display().to_string());
            match self.apply_one(&plan.profile, planned, &stamp) {
                Ok(action) => state.record(action),
                Err(error) => return Err(PartialApply { state, error }),
            }
            bar.inc(1);
        }

        if state.is_empty() {
            info!("profile {:?} already deployed", plan.profile);
        }

        Ok(state)
    }

    /// Report drift between a recorded state and the file system.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Inspect`] if a target cannot be inspected.
    pub fn status(&self, state: &DeploymentState) -> Result<StatusReport> {
        let entries = state
            .actions
            .iter()
            .map(|action| {
                StatusEntry::inspect(action).map_err(|source| DeployError::Inspect {
                    source,
                    path: action.target_path.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(StatusReport {
            profile: state.profile.clone(),
            id: state.id.clone(),
            entries,
        })
    }

    fn apply_one(&self, profile: &str, planned: &PlannedAction, stamp: &str) -> Result<Action> {
        let Mapping {
            source,
            target,
            kind,
        } = &planned.mapping;

        let backup_path = match planned.step {
            Step::Replace => Some(self.backup(profile, target, stamp)?),
            Step::Create | Step::Unchanged => None,
        };

        let unwritable = |source| DeployError::TargetUnwritable {
            source,
            target: target.clone(),
        };

        let created_dirs = match ensure_parent_dirs(&self.ops, target) {
            Ok(created_dirs) => created_dirs,
            Err(err) => {
                self.undo_failed(target, backup_path.as_deref(), &[], false);
                return Err(unwritable(err));
            }
        };

        let written = match kind {
            ActionKind::Symlink => self.ops.symlink(source, target),
            ActionKind::Copy => self.ops.copy_all(source, target),
        };
        if let Err(err) = written {
            // INVARIANT: Whatever already sits at the target was not written here.
            let wrote = err.kind() != io::ErrorKind::AlreadyExists;
            self.undo_failed(target, backup_path.as_deref(), &created_dirs, wrote);
            return Err(unwritable(err));
        }

        let digest = match kind {
            ActionKind::Symlink => None,
            ActionKind::Copy => match digest(target) {
                Ok(digest) => Some(digest),
                Err(source) => {
                    self.undo_failed(target, backup_path.as_deref(), &created_dirs, true);
                    return Err(DeployError::Inspect {
                        source,
                        path: target.clone(),
                    });
                }
            },
        };

        info!("{kind} {:?} -> {:?}", target.display(), source.display());

        Ok(Action {
            source_path: source.clone(),
            target_path: target.clone(),
            backup_path,
            kind: *kind,
            created_at: Utc::now(),
            created_dirs,
            digest,
        })
    }

    // INVARIANT: A failed action leaves its target as it was found.
    fn undo_failed(
        &self,
        target: &Path,
        backup: Option<&Path>,
        created_dirs: &[PathBuf],
        wrote: bool,
    ) {
        if wrote && self.ops.remove_all(target).is_ok() {
            debug!("removed partial write at {:?}", target.display());
        }

        for dir in created_dirs.iter().rev() {
            if self.ops.remove_dir(dir).is_err() {
                debug!("left directory {:?} in place", dir.display());
            }
        }

        let Some(backup) = backup else {
            return;
        };

        if !matches!(occupied(target), Ok(false)) {
            warn!(
                "{:?} is occupied, previous content remains at {:?}",
                target.display(),
                backup.display()
            );
            return;
        }

        if let Err(err) = self.ops.rename(backup, target) {
            warn!(
                "previous content of {:?} remains at {:?}: {err}",
                target.display(),
                backup.display()
            );
        }
    }

    /// Move the current occupant of `target` into the backup directory.
    ///
    /// The occupant is moved whole, so modes and timestamps survive. If the
    /// move fails the target is left untouched.
    fn backup(&self, profile: &str, target: &Path, stamp: &str) -> Result<PathBuf> {
        let backup = self
            .unique_backup_path(profile, target, "backup", stamp)
            .map_err(|source| DeployError::BackupFailed {
                source,
                target: target.to_path_buf(),
                backup: self.backup_dir.join(profile),
            })?;

        let failed = |source| DeployError::BackupFailed {
            source,
            target: target.to_path_buf(),
            backup: backup.clone(),
        };

        let created_dirs = ensure_parent_dirs(&self.ops, &backup).map_err(failed)?;
        if let Err(err) = self.ops.rename(target, &backup) {
            for dir in created_dirs.iter().rev() {
                if self.ops.remove_dir(dir).is_err() {
                    debug!("left directory {:?} in place", dir.display());
                }
            }
            return Err(failed(err));
        }
        debug!("backed up {:?} to {:?}", target.display(), backup.display());

        Ok(backup)
    }

    pub(crate) fn unique_backup_path(
        &self,
        profile: &str,
        target: &Path,
        label: &str,
        stamp: &str,
    ) -> io::Result<PathBuf> {
        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".into());

        unique_path(
            self.backup_dir
                .join(profile)
                .join(format!("{name}.{label}.{stamp}")),
        )
    }
}

/// Deployment stopped partway through a plan.
///
/// Holds every action applied before the failure, so the partial state can
/// still be persisted and rolled back.
#[derive(Debug, thiserror::Error)]
#[error(
    "deployment of profile {:?} stopped after {} action(s)",
    state.profile,
    state.actions.len()
)]
pub struct PartialApply {
    /// Actions applied before the failure.
    pub state: DeploymentState,

    /// Failure that stopped deployment.
    #[source]
    pub error: DeployError,
}

/// Deployment error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Planning failed.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Existing target could not be moved to its backup location.
    #[error("failed to back up {:?} to {:?}", target.display(), backup.display())]
    BackupFailed {
        #[source]
        source: io::Error,
        target: PathBuf,
        backup: PathBuf,
    },

    /// Symlink or copy could not be written to target.
    #[error("cannot write to target {:?}", target.display())]
    TargetUnwritable {
        #[source]
        source: io::Error,
        target: PathBuf,
    },

    /// Rollback finished, but some backups were missing.
    #[error("rollback incomplete, {} backup(s) missing: {missing:?}", missing.len())]
    RollbackIncomplete { missing: Vec<PathBuf> },

    /// Path could not be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Target could not be restored during rollback.
    #[error("failed to restore {:?}", target.display())]
    Restore {
        #[source]
        source: io::Error,
        target: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn apply_backs_up_replaced_targets() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("repo").join("kitty.conf");
        let target = root.path().join("home").join("kitty.conf");
        fs::create_dir_all(source.parent().unwrap())?;
        fs::create_dir_all(target.parent().unwrap())?;
        fs::write(&source, "font_size 11.0\n")?;
        fs::write(&target, "font_size 14.0\n")?;

        let deployer = Deployer::new(root.path().join("backups"));
        let plan = deployer.plan(
            "kitty",
            [Mapping::new(&source, &target, ActionKind::Symlink)],
        )?;
        let state = deployer.apply(&plan)?;

        assert_eq!(state.actions.len(), 1);
        let backup = state.actions[0].backup_path.clone().unwrap();
        assert!(backup.starts_with(root.path().join("backups").join("kitty")));
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("kitty.conf.backup."));
        assert_eq!(fs::read_to_string(&backup)?, "font_size 14.0\n");
        assert_eq!(fs::read_link(&target)?, source);

        Ok(())
    }

    #[test]
    fn apply_records_created_parent_dirs() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("fuzzel.ini");
        fs::write(&source, "[main]\nfont=monospace:size=11\n")?;
        let target = root.path().join(".config").join("fuzzel").join("fuzzel.ini");

        let deployer = Deployer::new(root.path().join("backups"));
        let plan = deployer.plan("fuzzel", [Mapping::new(&source, &target, ActionKind::Copy)])?;
        let state = deployer.apply(&plan)?;

        assert_eq!(
            state.actions[0].created_dirs,
            vec![
                root.path().join(".config"),
                root.path().join(".config").join("fuzzel"),
            ]
        );
        assert_eq!(fs::read_to_string(&target)?, "[main]\nfont=monospace:size=11\n");
        assert_eq!(state.actions[0].backup_path, None);

        Ok(())
    }

    #[test]
    fn unique_backup_path_appends_counter() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let deployer = Deployer::new(root.path());
        let target = Path::new("/home/blah/.zshrc");

        let first = deployer.unique_backup_path("shell", target, "backup", "20250102_030405")?;
        assert_eq!(first, root.path().join("shell").join(".zshrc.backup.20250102_030405"));

        fs::create_dir_all(first.parent().unwrap())?;
        fs::write(&first, "")?;
        let second = deployer.unique_backup_path("shell", target, "backup", "20250102_030405")?;
        assert_eq!(second, root.path().join("shell").join(".zshrc.backup.20250102_030405.1"));

        Ok(())
    }

    #[test]
    fn failed_write_keeps_target_that_appeared_after_planning() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let zshrc = root.path().join("zshrc");
        let kitty = root.path().join("kitty.conf");
        fs::write(&zshrc, "bindkey -v\n")?;
        fs::write(&kitty, "font_size 11.0\n")?;
        let home = root.path().join("home");
        fs::create_dir_all(&home)?;

        let deployer = Deployer::new(root.path().join("backups"));
        for (source, target, kind) in [
            (&zshrc, home.join(".zshrc"), ActionKind::Symlink),
            (&kitty, home.join("kitty.conf"), ActionKind::Copy),
        ] {
            let plan = deployer.plan("shell", [Mapping::new(source, &target, kind)])?;
            assert_eq!(plan.actions[0].step, Step::Create);

            fs::write(&target, "written by someone else\n")?;
            let partial = match deployer.apply(&plan) {
                Ok(_) => anyhow::bail!("{kind} onto {target:?} should have failed"),
                Err(partial) => partial,
            };

            assert!(partial.state.is_empty());
            assert!(matches!(
                &partial.error,
                DeployError::TargetUnwritable { source, .. }
                    if source.kind() == io::ErrorKind::AlreadyExists
            ));
            assert_eq!(fs::read_to_string(&target)?, "written by someone else\n");
        }
        assert!(!root.path().join("backups").exists());

        Ok(())
    }

    #[test]
    fn apply_records_digest_of_copies() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("btop.conf");
        fs::write(&source, "color_theme = \"latte\"\n")?;
        let copied = root.path().join("copied.conf");
        let linked = root.path().join("linked.conf");

        let deployer = Deployer::new(root.path().join("backups"));
        let plan = deployer.plan(
            "btop",
            [
                Mapping::new(&source, &copied, ActionKind::Copy),
                Mapping::new(&source, &linked, ActionKind::Symlink),
            ],
        )?;
        let state = deployer.apply(&plan)?;

        assert_eq!(state.actions[0].digest, Some(digest(&copied)?));
        assert_eq!(state.actions[1].digest, None);

        Ok(())
    }
}
