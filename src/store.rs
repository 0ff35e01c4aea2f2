// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment state store management.
//!
//! Dotlink keeps every deploy run it performs in one place called the
//! __state store__. Each run gets its own record, so older deployments can
//! still be inspected or rolled back after newer ones have happened.
//!
//! # State Store Layout
//!
//! The state store can generally be placed anywhere on the user's file
//! system. However, the default location is `$XDG_DATA_HOME/dotlink/state`.
//! Every profile gets its own directory, and every run of that profile is a
//! pretty-printed JSON file named after the run id. So,
//! `state/hyprland/20250102_030405.json` is the run of the "hyprland"
//! profile that started at 03:04:05 on January 2nd, 2025.
//!
//! Runs are ordered by the time recorded inside each record, with the `-N`
//! suffix of colliding run ids breaking ties.

use crate::deploy::model::{check_profile_name, DeploymentState, InvalidProfileName};

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Append-only store of deployment state records.
#[derive(Debug, Clone)]
pub struct StateStore {
    store_path: PathBuf,
}

impl StateStore {
    /// Open state store at target path.
    ///
    /// Creates the store directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateStore`] if store directory cannot be
    ///   created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store_path = path.into();
        fs::create_dir_all(&store_path).map_err(|source| StoreError::CreateStore {
            source,
            store_path: store_path.clone(),
        })?;

        Ok(Self { store_path })
    }

    /// Path to state store directory.
    pub fn path(&self) -> &Path {
        self.store_path.as_path()
    }

    /// Write deployment state as a new record.
    ///
    /// If the run id is already taken by another record, the state's id is
    /// given a `-N` suffix first. Returns path to the written record.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Serialize`] if state cannot be serialized.
    /// - Return [`StoreError::Write`] if record cannot be written.
    #[instrument(skip(self, state), fields(profile = %state.profile), level = "debug")]
    pub fn save(&self, state: &mut DeploymentState) -> Result<PathBuf> {
        let profile_dir = self.profile_dir(&state.profile)?;
        fs::create_dir_all(&profile_dir).map_err(|source| StoreError::Write {
            source,
            record_path: profile_dir.clone(),
        })?;

        let base_id = state.id.clone();
        let mut counter = 1usize;
        while profile_dir.join(format!("{}.json", state.id)).exists() {
            state.id = format!("{base_id}-{counter}");
            counter += 1;
        }

        let record_path = profile_dir.join(format!("{}.json", state.id));
        write_record(&record_path, state)?;
        info!("saved state {:?}", record_path.display());

        Ok(record_path)
    }

    /// Overwrite an existing record with a new version of its state.
    ///
    /// Used after a rollback stopped partway, so the record only lists
    /// actions that are still deployed.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if no record of that run exists.
    /// - Return [`StoreError::Serialize`] if state cannot be serialized.
    /// - Return [`StoreError::Write`] if record cannot be written.
    pub fn update(&self, state: &DeploymentState) -> Result<PathBuf> {
        let record_path = self.record_path(&state.profile, &state.id)?;
        if !record_path.is_file() {
            return Err(StoreError::NotFound {
                profile: state.profile.clone(),
                id: Some(state.id.clone()),
            });
        }

        write_record(&record_path, state)?;
        info!("updated state {:?}", record_path.display());

        Ok(record_path)
    }

    /// Load a specific record of a profile.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if no such record exists.
    /// - Return [`StoreError::Read`] if record cannot be read.
    /// - Return [`StoreError::Deserialize`] if record is malformed.
    pub fn load(&self, profile: impl AsRef<str>, id: impl AsRef<str>) -> Result<DeploymentState> {
        let record_path = self.record_path(profile.as_ref(), id.as_ref())?;
        if !record_path.is_file() {
            return Err(StoreError::NotFound {
                profile: profile.as_ref().to_string(),
                id: Some(id.as_ref().to_string()),
            });
        }

        read_record(&record_path)
    }

    /// Most recent record of a profile, if any.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if records cannot be read.
    /// - Return [`StoreError::Deserialize`] if latest record is malformed.
    pub fn latest(&self, profile: impl AsRef<str>) -> Result<Option<DeploymentState>> {
        Ok(self.history(profile)?.pop())
    }

    /// All records of a profile, oldest first.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if records cannot be read.
    /// - Return [`StoreError::Deserialize`] if any record is malformed.
    pub fn history(&self, profile: impl AsRef<str>) -> Result<Vec<DeploymentState>> {
        let mut records = self
            .record_ids(profile.as_ref())?
            .iter()
            .map(|id| self.load(profile.as_ref(), id))
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|state| (state.created_at, run_counter(&state.id)));

        Ok(records)
    }

    /// Delete a record.
    ///
    /// Removes the profile's directory too once its last record is gone.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if no such record exists.
    /// - Return [`StoreError::Remove`] if record cannot be deleted.
    pub fn remove(&self, profile: impl AsRef<str>, id: impl AsRef<str>) -> Result<()> {
        let record_path = self.record_path(profile.as_ref(), id.as_ref())?;
        if !record_path.is_file() {
            return Err(StoreError::NotFound {
                profile: profile.as_ref().to_string(),
                id: Some(id.as_ref().to_string()),
            });
        }

        fs::remove_file(&record_path).map_err(|source| StoreError::Remove {
            source,
            record_path: record_path.clone(),
        })?;
        info!("removed state {:?}", record_path.display());

        let profile_dir = self.profile_dir(profile.as_ref())?;
        if self.record_ids(profile.as_ref())?.is_empty() && fs::remove_dir(&profile_dir).is_ok() {
            debug!("removed empty profile directory {:?}", profile_dir.display());
        }

        Ok(())
    }

    /// Names of profiles that have at least one record.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if store directory cannot be read.
    pub fn profiles(&self) -> Result<Vec<String>> {
        let mut profiles = Vec::new();
        for entry in read_dir(&self.store_path)? {
            if entry.path().is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !self.record_ids(&name)?.is_empty() {
                    profiles.push(name);
                }
            }
        }
        profiles.sort();

        Ok(profiles)
    }

    fn record_ids(&self, profile: &str) -> Result<Vec<String>> {
        let profile_dir = self.profile_dir(profile)?;
        if !profile_dir.is_dir() {
            return Ok(Vec::new());
        }

        let ids = read_dir(&profile_dir)?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .collect::<Vec<_>>();

        Ok(ids)
    }

    fn profile_dir(&self, profile: &str) -> Result<PathBuf> {
        check_profile_name(profile)?;
        Ok(self.store_path.join(profile))
    }

    fn record_path(&self, profile: &str, id: &str) -> Result<PathBuf> {
        // INVARIANT: Run ids name files inside their profile directory.
        check_profile_name(id)?;
        Ok(self.profile_dir(profile)?.join(format!("{id}.json")))
    }
}

// 20250102_030405-10 sorts after 20250102_030405-9.
fn run_counter(id: &str) -> usize {
    match id.rsplit_once('-') {
        Some((_, counter)) => counter.parse().unwrap_or(usize::MAX),
        None => 0,
    }
}

fn write_record(record_path: &Path, state: &DeploymentState) -> Result<()> {
    let content = serde_json::to_string_pretty(state).map_err(StoreError::Serialize)?;
    fs::write(record_path, content).map_err(|source| StoreError::Write {
        source,
        record_path: record_path.to_path_buf(),
    })
}

fn read_dir(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    let read = |source| StoreError::Read {
        source,
        record_path: dir.to_path_buf(),
    };

    fs::read_dir(dir)
        .map_err(read)?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(read)
}

fn read_record(record_path: &Path) -> Result<DeploymentState> {
    let content = fs::read_to_string(record_path).map_err(|source| StoreError::Read {
        source,
        record_path: record_path.to_path_buf(),
    })?;

    serde_json::from_str(&content).map_err(|source| StoreError::Deserialize {
        source,
        record_path: record_path.to_path_buf(),
    })
}

/// All possible error types for state store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// State store directory cannot be created.
    #[error("failed to create state store at {:?}", store_path.display())]
    CreateStore {
        #[source]
        source: std::io::Error,
        store_path: PathBuf,
    },

    /// Record does not exist.
    #[error("no deployment state recorded for profile {profile:?}{}", id.as_ref().map(|id| format!(" with id {id:?}")).unwrap_or_default())]
    NotFound { profile: String, id: Option<String> },

    /// Record cannot be read.
    #[error("failed to read state at {:?}", record_path.display())]
    Read {
        #[source]
        source: std::io::Error,
        record_path: PathBuf,
    },

    /// Record cannot be written.
    #[error("failed to write state at {:?}", record_path.display())]
    Write {
        #[source]
        source: std::io::Error,
        record_path: PathBuf,
    },

    /// Record cannot be deleted.
    #[error("failed to remove state at {:?}", record_path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        record_path: PathBuf,
    },

    /// State cannot be serialized.
    #[error(transparent)]
    Serialize(serde_json::Error),

    /// Profile name or run id cannot name a file in the store.
    #[error(transparent)]
    InvalidName(#[from] InvalidProfileName),

    /// Record is malformed.
    #[error("malformed state at {:?}", record_path.display())]
    Deserialize {
        #[source]
        source: serde_json::Error,
        record_path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state(profile: &str, id: &str) -> DeploymentState {
        let mut state = DeploymentState::new(profile);
        state.id = id.into();
        state
    }

    #[test]
    fn save_then_load_latest() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = StateStore::open(root.path().join("state"))?;

        let mut older = state("hyprland", "20250102_030405");
        let mut newer = state("hyprland", "20250103_000000");
        store.save(&mut older)?;
        let path = store.save(&mut newer)?;
        assert_eq!(path, root.path().join("state/hyprland/20250103_000000.json"));

        let latest = store.latest("hyprland")?.unwrap();
        assert_eq!(latest, newer);
        assert_eq!(store.history("hyprland")?, vec![older, newer]);
        assert_eq!(store.latest("kitty")?, None);

        Ok(())
    }

    #[test]
    fn save_suffixes_colliding_ids() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = StateStore::open(root.path())?;

        let mut runs = (0..11)
            .map(|_| state("claude", "20250102_030405"))
            .collect::<Vec<_>>();
        for run in &mut runs {
            store.save(run)?;
        }

        assert_eq!(runs[0].id, "20250102_030405");
        assert_eq!(runs[1].id, "20250102_030405-1");
        assert_eq!(runs[10].id, "20250102_030405-10");
        assert_eq!(store.latest("claude")?.unwrap().id, "20250102_030405-10");

        Ok(())
    }

    #[test]
    fn remove_deletes_record_and_empty_profile() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = StateStore::open(root.path())?;

        let mut run = state("fuzzel", "20250102_030405");
        store.save(&mut run)?;
        let mut other = state("mako", "20250102_030405");
        store.save(&mut other)?;
        assert_eq!(store.profiles()?, vec!["fuzzel".to_string(), "mako".to_string()]);

        store.remove("fuzzel", &run.id)?;
        assert_eq!(store.latest("fuzzel")?, None);
        assert!(!root.path().join("fuzzel").exists());
        assert_eq!(store.profiles()?, vec!["mako".to_string()]);

        assert!(matches!(
            store.remove("fuzzel", &run.id),
            Err(StoreError::NotFound { .. })
        ));

        Ok(())
    }

    #[test]
    fn history_follows_recorded_time_not_id() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = StateStore::open(root.path())?;

        // Clocks fell back an hour between these runs.
        let mut before = state("waybar", "20251026_023000");
        before.created_at = "2025-10-26T00:30:00Z".parse()?;
        let mut after = state("waybar", "20251026_021500");
        after.created_at = "2025-10-26T01:15:00Z".parse()?;
        store.save(&mut after)?;
        store.save(&mut before)?;

        assert_eq!(store.history("waybar")?, vec![before, after.clone()]);
        assert_eq!(store.latest("waybar")?, Some(after));

        Ok(())
    }

    #[test]
    fn update_rewrites_existing_record() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = StateStore::open(root.path())?;

        let mut run = state("btop", "20250102_030405");
        assert!(matches!(store.update(&run), Err(StoreError::NotFound { .. })));
        store.save(&mut run)?;

        let mut trimmed = run.clone();
        trimmed.created_at = "2025-01-02T03:04:05Z".parse()?;
        store.update(&trimmed)?;

        assert_eq!(store.load("btop", &run.id)?, trimmed);
        assert_eq!(store.history("btop")?.len(), 1);

        Ok(())
    }

    #[test]
    fn reject_names_escaping_store() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = StateStore::open(root.path().join("state"))?;

        let mut run = state("../escape", "20250102_030405");
        assert!(matches!(store.save(&mut run), Err(StoreError::InvalidName(_))));
        assert!(matches!(store.latest(".."), Err(StoreError::InvalidName(_))));
        assert!(matches!(
            store.load("shell", "../../outside"),
            Err(StoreError::InvalidName(_))
        ));
        assert!(!root.path().join("escape").exists());

        Ok(())
    }
}
