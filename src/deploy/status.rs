// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Drift detection for recorded deployments.

use crate::deploy::{
    fsops::{digest, occupied, same_contents},
    model::{Action, ActionKind},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs, io,
    path::{Path, PathBuf},
};

/// How a deployed target compares to what was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// Target still holds what was deployed.
    InSync,

    /// Target no longer exists.
    Missing,

    /// Symlink was replaced with something that is not a symlink.
    Replaced,

    /// Symlink now points somewhere else.
    Retargeted(PathBuf),

    /// Copied content no longer matches what was deployed.
    Modified,
}

impl Drift {
    /// Inspect a recorded action's target.
    pub fn inspect(action: &Action) -> io::Result<Self> {
        let target = action.target_path.as_path();
        if !occupied(target)? {
            return Ok(Self::Missing);
        }

        match action.kind {
            ActionKind::Symlink => match fs::read_link(target) {
                Ok(dest) if dest == action.source_path => Ok(Self::InSync),
                Ok(dest) => Ok(Self::Retargeted(dest)),
                Err(_) => Ok(Self::Replaced),
            },
            ActionKind::Copy => {
                let in_sync = match &action.digest {
                    Some(recorded) => digest(target)? == *recorded,
                    // Records without a digest can only be held against the source.
                    None => {
                        occupied(&action.source_path)? && same_contents(&action.source_path, target)?
                    }
                };

                if in_sync {
                    Ok(Self::InSync)
                } else {
                    Ok(Self::Modified)
                }
            }
        }
    }

    /// Check if target still holds what was deployed.
    pub fn is_in_sync(&self) -> bool {
        matches!(self, Self::InSync)
    }
}

impl Display for Drift {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::InSync => fmt.write_str("in sync"),
            Self::Missing => fmt.write_str("missing"),
            Self::Replaced => fmt.write_str("replaced, no longer a symlink"),
            Self::Retargeted(dest) => write!(fmt, "links to {}", dest.display()),
            Self::Modified => fmt.write_str("content differs from deployed copy"),
        }
    }
}

/// Status of one recorded action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub source: PathBuf,
    pub target: PathBuf,
    pub kind: ActionKind,
    pub drift: Drift,

    /// Recorded backup, and whether it is still on disk.
    pub backup: Option<(PathBuf, bool)>,
}

impl StatusEntry {
    pub(crate) fn inspect(action: &Action) -> io::Result<Self> {
        let backup = match &action.backup_path {
            Some(path) => Some((path.clone(), occupied(path)?)),
            None => None,
        };

        Ok(Self {
            source: action.source_path.clone(),
            target: action.target_path.clone(),
            kind: action.kind,
            drift: Drift::inspect(action)?,
            backup,
        })
    }

    /// Check if the recorded backup has gone missing.
    pub fn backup_missing(&self) -> bool {
        matches!(self.backup, Some((_, false)))
    }
}

/// Drift report for one deployment state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub profile: String,
    pub id: String,
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    /// Entries whose targets drifted from what was deployed.
    pub fn drifted(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(|entry| !entry.drift.is_in_sync())
    }

    /// Check if every target still holds what was deployed.
    pub fn is_clean(&self) -> bool {
        self.drifted().next().is_none()
    }

    /// Find entry for a target path.
    pub fn entry(&self, target: impl AsRef<Path>) -> Option<&StatusEntry> {
        self.entries
            .iter()
            .find(|entry| entry.target == target.as_ref())
    }
}

impl Display for StatusReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "profile {} (run {}):", self.profile, self.id)?;
        for entry in &self.entries {
            writeln!(
                fmt,
                "  {:<7} {} -> {}: {}",
                entry.kind,
                entry.target.display(),
                entry.source.display(),
                entry.drift
            )?;
            if let Some((backup, present)) = &entry.backup {
                let note = if *present { "" } else { " (missing)" };
                writeln!(fmt, "          backup {}{note}", backup.display())?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::fsops::{FileOps, HostFs};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn action(source: &Path, target: &Path, kind: ActionKind) -> Action {
        Action {
            source_path: source.to_path_buf(),
            target_path: target.to_path_buf(),
            backup_path: None,
            kind,
            created_at: Utc::now(),
            created_dirs: Vec::new(),
            digest: None,
        }
    }

    #[test]
    fn drift_for_symlink_targets() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("waybar.jsonc");
        let other = root.path().join("other.jsonc");
        let target = root.path().join("config.jsonc");
        fs::write(&source, "{}\n")?;
        fs::write(&other, "{}\n")?;
        let recorded = action(&source, &target, ActionKind::Symlink);

        assert_eq!(Drift::inspect(&recorded)?, Drift::Missing);

        HostFs.symlink(&source, &target)?;
        assert_eq!(Drift::inspect(&recorded)?, Drift::InSync);

        fs::remove_file(&target)?;
        HostFs.symlink(&other, &target)?;
        assert_eq!(Drift::inspect(&recorded)?, Drift::Retargeted(other));

        fs::remove_file(&target)?;
        fs::write(&target, "{}\n")?;
        assert_eq!(Drift::inspect(&recorded)?, Drift::Replaced);

        Ok(())
    }

    #[test]
    fn drift_for_copied_targets() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("btop.conf");
        let target = root.path().join("deployed.conf");
        fs::write(&source, "color_theme = \"latte\"\n")?;
        fs::write(&target, "color_theme = \"latte\"\n")?;
        let recorded = action(&source, &target, ActionKind::Copy);

        assert_eq!(Drift::inspect(&recorded)?, Drift::InSync);

        fs::write(&target, "color_theme = \"mocha\"\n")?;
        assert_eq!(Drift::inspect(&recorded)?, Drift::Modified);

        Ok(())
    }

    #[test]
    fn copy_drift_ignores_source_edits() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("kitty.conf");
        let target = root.path().join("deployed.conf");
        fs::write(&source, "font_size 11.0\n")?;
        HostFs.copy_all(&source, &target)?;
        let mut recorded = action(&source, &target, ActionKind::Copy);
        recorded.digest = Some(digest(&target)?);

        fs::write(&source, "font_size 12.0\n")?;
        assert_eq!(Drift::inspect(&recorded)?, Drift::InSync);

        fs::write(&target, "font_size 14.0\n")?;
        assert_eq!(Drift::inspect(&recorded)?, Drift::Modified);

        Ok(())
    }

    #[test]
    fn status_entry_notes_missing_backup() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("mako");
        fs::write(&source, "anchor=top-right\n")?;
        let mut recorded = action(&source, &root.path().join("config"), ActionKind::Symlink);
        recorded.backup_path = Some(root.path().join("config.backup.20250102_030405"));

        let entry = StatusEntry::inspect(&recorded)?;
        assert!(entry.backup_missing());
        assert_eq!(entry.drift, Drift::Missing);

        Ok(())
    }
}
