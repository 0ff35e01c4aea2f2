// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment planning.
//!
//! Planning inspects each mapping's target and decides what applying it
//! would do. Nothing is written while planning.

use crate::deploy::{
    fsops::{links_to, occupied, same_contents},
    model::{check_profile_name, ActionKind, InvalidProfileName, Mapping},
};

use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// What applying a mapping would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Target already holds the source, nothing to do.
    Unchanged,

    /// Target does not exist, deploy directly.
    Create,

    /// Target exists as something else, back it up then deploy.
    Replace,
}

impl Display for Step {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Unchanged => fmt.write_str("unchanged"),
            Self::Create => fmt.write_str("create"),
            Self::Replace => fmt.write_str("replace"),
        }
    }
}

/// Mapping paired with its planned step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub mapping: Mapping,
    pub step: Step,
}

impl PlannedAction {
    /// Check if target must be backed up before it is overwritten.
    pub fn needs_backup(&self) -> bool {
        self.step == Step::Replace
    }
}

/// Ordered plan for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub profile: String,
    pub actions: Vec<PlannedAction>,
}

impl Plan {
    /// Planned actions that would change something.
    pub fn pending(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions
            .iter()
            .filter(|action| action.step != Step::Unchanged)
    }

    /// Check if applying the plan would change nothing.
    pub fn is_noop(&self) -> bool {
        self.pending().next().is_none()
    }
}

impl Display for Plan {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "profile {}:", self.profile)?;
        for action in &self.actions {
            writeln!(
                fmt,
                "  {:<9} {} {} -> {}",
                action.step,
                action.mapping.kind,
                action.mapping.target.display(),
                action.mapping.source.display(),
            )?;
        }

        Ok(())
    }
}

/// Plan deployment of a listing of mappings.
///
/// # Errors
///
/// - Return [`PlanError::SourceMissing`] if a mapping's source does not
///   exist.
/// - Return [`PlanError::Inspect`] if a target cannot be inspected.
/// - Return [`PlanError::DuplicateTarget`] if two mappings share a target.
/// - Return [`PlanError::InvalidProfile`] if the profile name cannot name a
///   directory.
pub fn plan(profile: impl Into<String>, mappings: impl IntoIterator<Item = Mapping>) -> Result<Plan> {
    let profile = profile.into();
    check_profile_name(&profile)?;

    let mut targets = HashSet::new();
    let mut actions = Vec::new();
    for mapping in mappings {
        if !targets.insert(mapping.target.clone()) {
            return Err(PlanError::DuplicateTarget {
                target: mapping.target,
            });
        }

        let step = plan_step(&mapping)?;
        actions.push(PlannedAction { mapping, step });
    }

    Ok(Plan { profile, actions })
}

fn plan_step(mapping: &Mapping) -> Result<Step> {
    if !occupied(&mapping.source).map_err(inspect(&mapping.source))? {
        return Err(PlanError::SourceMissing {
            source_path: mapping.source.clone(),
        });
    }

    if !occupied(&mapping.target).map_err(inspect(&mapping.target))? {
        return Ok(Step::Create);
    }

    let deployed = match mapping.kind {
        ActionKind::Symlink => links_to(&mapping.target, &mapping.source),
        ActionKind::Copy => {
            same_contents(&mapping.source, &mapping.target).map_err(inspect(&mapping.target))?
        }
    };

    if deployed {
        Ok(Step::Unchanged)
    } else {
        Ok(Step::Replace)
    }
}

fn inspect(path: &Path) -> impl FnOnce(std::io::Error) -> PlanError + '_ {
    move |source| PlanError::Inspect {
        source,
        path: path.to_path_buf(),
    }
}

/// Planning error types.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Source of a mapping does not exist.
    #[error("source {:?} does not exist", source_path.display())]
    SourceMissing { source_path: PathBuf },

    /// Path cannot be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// More than one mapping deploys to the same target.
    #[error("target {:?} is listed more than once", target.display())]
    DuplicateTarget { target: PathBuf },

    /// Profile name cannot be used as a directory name.
    #[error(transparent)]
    InvalidProfile(#[from] InvalidProfileName),
}

/// Friendly result alias :3
type Result<T, E = PlanError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::fsops::{FileOps, HostFs};
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn plan_classifies_targets() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let repo = root.path().join("repo");
        let home = root.path().join("home");
        fs::create_dir_all(&repo)?;
        fs::create_dir_all(&home)?;

        fs::write(repo.join("zshrc"), "bindkey -v\n")?;
        fs::write(repo.join("tmux.conf"), "set -g mouse on\n")?;
        fs::write(repo.join("kitty.conf"), "font_size 11.0\n")?;
        fs::write(repo.join("mako"), "anchor=top-right\n")?;

        HostFs.symlink(&repo.join("zshrc"), &home.join(".zshrc"))?;
        fs::write(home.join(".tmux.conf"), "set -g prefix C-a\n")?;
        fs::write(home.join("kitty.conf"), "font_size 11.0\n")?;

        let result = plan(
            "shell",
            [
                Mapping::new(repo.join("zshrc"), home.join(".zshrc"), ActionKind::Symlink),
                Mapping::new(repo.join("tmux.conf"), home.join(".tmux.conf"), ActionKind::Symlink),
                Mapping::new(repo.join("kitty.conf"), home.join("kitty.conf"), ActionKind::Copy),
                Mapping::new(repo.join("mako"), home.join("mako"), ActionKind::Symlink),
            ],
        )?;

        let steps = result.actions.iter().map(|action| action.step).collect::<Vec<_>>();
        assert_eq!(steps, vec![Step::Unchanged, Step::Replace, Step::Unchanged, Step::Create]);
        assert_eq!(result.pending().count(), 2);
        assert!(!result.is_noop());

        Ok(())
    }

    #[test]
    fn plan_treats_symlink_elsewhere_as_replace() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        fs::write(root.path().join("ours"), "ours\n")?;
        fs::write(root.path().join("theirs"), "theirs\n")?;
        HostFs.symlink(&root.path().join("theirs"), &root.path().join("target"))?;

        let result = plan(
            "misc",
            [Mapping::new(
                root.path().join("ours"),
                root.path().join("target"),
                ActionKind::Symlink,
            )],
        )?;
        assert_eq!(result.actions[0].step, Step::Replace);
        assert!(result.actions[0].needs_backup());

        Ok(())
    }

    #[test]
    fn plan_rejects_missing_source() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let result = plan(
            "fuzzel",
            [Mapping::new(
                root.path().join("fuzzel.ini"),
                root.path().join("target"),
                ActionKind::Symlink,
            )],
        );
        assert!(matches!(result, Err(PlanError::SourceMissing { .. })));

        Ok(())
    }

    #[test]
    fn plan_rejects_duplicate_targets() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        fs::write(root.path().join("init.lua"), "vim.o.number = true\n")?;
        fs::write(root.path().join("init.vim"), "set number\n")?;
        let target = root.path().join(".config").join("nvim").join("init.lua");

        let result = plan(
            "nvim",
            [
                Mapping::new(root.path().join("init.lua"), &target, ActionKind::Symlink),
                Mapping::new(root.path().join("init.vim"), &target, ActionKind::Symlink),
            ],
        );
        assert!(matches!(
            result,
            Err(PlanError::DuplicateTarget { target: dup }) if dup == target
        ));

        Ok(())
    }

    #[test]
    fn plan_rejects_unsafe_profile_name() {
        let result = plan("../escape", Vec::<Mapping>::new());
        assert!(matches!(result, Err(PlanError::InvalidProfile(_))));
    }
}
