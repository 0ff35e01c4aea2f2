// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.
//!
//! # Data Directory Layout
//!
//! Everything dotlink writes on its own behalf lives in one data directory,
//! `$XDG_DATA_HOME/dotlink` by default:
//!
//! ```text
//! dotlink/
//! ├── backups/<profile>/<name>.backup.<timestamp>
//! └── state/<profile>/<run id>.json
//! ```

use std::path::{Path, PathBuf};

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to dotlink's data directory.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/dotlink` as the default
/// absolute path. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("dotlink"))
        .ok_or(NoWayHome)
}

/// Directory holding deployment state records under a data directory.
pub fn state_dir(data_dir: impl AsRef<Path>) -> PathBuf {
    data_dir.as_ref().join("state")
}

/// Directory holding timestamped backups under a data directory.
pub fn backup_dir(data_dir: impl AsRef<Path>) -> PathBuf {
    data_dir.as_ref().join("backups")
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("XDG_DATA_HOME", "/tmp/xdg-data")])]
    fn default_data_dir_follows_xdg_data_home() -> anyhow::Result<()> {
        let data_dir = default_data_dir()?;
        assert_eq!(data_dir, PathBuf::from("/tmp/xdg-data/dotlink"));
        assert_eq!(state_dir(&data_dir), PathBuf::from("/tmp/xdg-data/dotlink/state"));
        assert_eq!(backup_dir(&data_dir), PathBuf::from("/tmp/xdg-data/dotlink/backups"));

        Ok(())
    }
}
