// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment data model.
//!
//! A __mapping__ says where a source file should show up. An __action__ is
//! the record of one mapping actually being deployed, together with
//! everything needed to undo it. A __deployment state__ groups the actions
//! of a single deploy run.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
};

/// How a source file is materialized at its target.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Target becomes a symlink pointing at the source.
    #[default]
    Symlink,

    /// Target becomes an independent copy of the source.
    Copy,
}

impl Display for ActionKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Symlink => fmt.write_str("symlink"),
            Self::Copy => fmt.write_str("copy"),
        }
    }
}

impl FromStr for ActionKind {
    type Err = UnknownActionKind;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            "symlink" => Ok(Self::Symlink),
            "copy" => Ok(Self::Copy),
            other => Err(UnknownActionKind(other.to_string())),
        }
    }
}

/// Action kind is neither "symlink" nor "copy".
#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown action kind {0:?}, expected \"symlink\" or \"copy\"")]
pub struct UnknownActionKind(pub String);

/// Resolved source to target pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// Absolute path to source file in the dotfile repository.
    pub source: PathBuf,

    /// Absolute path where the source should be deployed.
    pub target: PathBuf,

    /// How to deploy the source.
    pub kind: ActionKind,
}

impl Mapping {
    /// Construct new mapping.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>, kind: ActionKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
        }
    }
}

/// Record of one deployed mapping.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Action {
    /// Source that was deployed.
    pub source_path: PathBuf,

    /// Target that was written.
    pub target_path: PathBuf,

    /// Where the previous occupant of the target was backed up, if any.
    pub backup_path: Option<PathBuf>,

    /// How the source was deployed.
    pub kind: ActionKind,

    /// When the action was applied.
    pub created_at: DateTime<Utc>,

    /// Parent directories created to hold the target, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_dirs: Vec<PathBuf>,

    /// SHA-256 digest of what a copy wrote to the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Persisted record of one deploy run.
///
/// # Invariant
///
/// - Actions are kept in the order they were applied.
/// - Every action with a backup path had that backup written before its
///   target was touched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeploymentState {
    /// Profile the run deployed.
    pub profile: String,

    /// Run identifier, also the file stem of its state record.
    pub id: String,

    /// When the run started.
    pub created_at: DateTime<Utc>,

    /// Actions applied during the run.
    pub actions: Vec<Action>,
}

impl DeploymentState {
    /// Start a new, empty deployment state for a profile.
    ///
    /// The run id is the local start time formatted as `YYYYmmdd_HHMMSS`.
    pub fn new(profile: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            profile: profile.into(),
            id: now.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string(),
            created_at: now,
            actions: Vec::new(),
        }
    }

    /// Append an applied action.
    pub fn record(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Check whether the run changed anything.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Iterate over recorded backup paths.
    pub fn backups(&self) -> impl Iterator<Item = &PathBuf> {
        self.actions
            .iter()
            .filter_map(|action| action.backup_path.as_ref())
    }
}

/// Check that a profile name can safely name a directory.
///
/// # Errors
///
/// - Return [`InvalidProfileName`] if the name is empty, is `.` or `..`, or
///   contains a path separator.
pub fn check_profile_name(name: &str) -> Result<(), InvalidProfileName> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(InvalidProfileName(name.to_string()));
    }

    Ok(())
}

/// Profile name cannot be used as a directory name.
#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid profile name {0:?}, it must be a plain file name")]
pub struct InvalidProfileName(pub String);

/// Timestamp layout for run ids and backup names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("symlink", ActionKind::Symlink; "symlink")]
    #[test_case("copy", ActionKind::Copy; "copy")]
    #[test]
    fn parse_action_kind(input: &str, expect: ActionKind) {
        use pretty_assertions::assert_eq;
        let result: ActionKind = input.parse().unwrap();
        assert_eq!(result, expect);
        assert_eq!(result.to_string(), input);
    }

    #[test_case("hyprland"; "plain")]
    #[test_case("kitty.d"; "dotted")]
    #[test]
    fn accept_profile_name(name: &str) {
        assert!(check_profile_name(name).is_ok());
    }

    #[test_case(""; "empty")]
    #[test_case(".."; "parent")]
    #[test_case("../x"; "escapes")]
    #[test_case("hypr/land"; "nested")]
    #[test_case("hypr\\land"; "backslash")]
    #[test]
    fn reject_profile_name(name: &str) {
        assert!(check_profile_name(name).is_err());
    }

    #[test]
    fn action_without_digest_still_loads() -> anyhow::Result<()> {
        let action: Action = serde_json::from_str(
            r#"{
                "source_path": "/repo/zshrc",
                "target_path": "/home/blah/.zshrc",
                "backup_path": null,
                "kind": "copy",
                "created_at": "2025-01-02T03:04:05Z"
            }"#,
        )?;
        assert_eq!(action.digest, None);
        assert!(action.created_dirs.is_empty());

        Ok(())
    }

    #[test]
    fn reject_unknown_action_kind() {
        assert!("hardlink".parse::<ActionKind>().is_err());
    }

    #[test]
    fn action_omits_empty_created_dirs() -> anyhow::Result<()> {
        let action = Action {
            source_path: "/repo/config/kitty/kitty.conf".into(),
            target_path: "/home/blah/.config/kitty/kitty.conf".into(),
            backup_path: None,
            kind: ActionKind::Copy,
            created_at: DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")?.with_timezone(&Utc),
            created_dirs: Vec::new(),
            digest: None,
        };

        let json = serde_json::to_value(&action)?;
        assert_eq!(json.get("created_dirs"), None);
        assert_eq!(json["kind"], "copy");
        assert_eq!(json["backup_path"], serde_json::Value::Null);

        let back: Action = serde_json::from_value(json)?;
        assert_eq!(back, action);

        Ok(())
    }

    #[test]
    fn backups_lists_only_actions_with_backups() {
        let mut state = DeploymentState::new("shell");
        let now = Utc::now();
        state.record(Action {
            source_path: "/repo/zshrc".into(),
            target_path: "/home/blah/.zshrc".into(),
            backup_path: Some("/backups/shell/.zshrc.backup.20250102_030405".into()),
            kind: ActionKind::Symlink,
            created_at: now,
            created_dirs: Vec::new(),
            digest: None,
        });
        state.record(Action {
            source_path: "/repo/zprofile".into(),
            target_path: "/home/blah/.zprofile".into(),
            backup_path: None,
            kind: ActionKind::Symlink,
            created_at: now,
            created_dirs: Vec::new(),
            digest: None,
        });

        let backups = state.backups().cloned().collect::<Vec<_>>();
        assert_eq!(
            backups,
            vec![PathBuf::from("/backups/shell/.zshrc.backup.20250102_030405")]
        );
        assert!(!state.is_empty());
    }
}
