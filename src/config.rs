// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the manifest file that dotlink uses to simplify
//! the process of serialization and deserialization. File I/O is left to the
//! caller to figure out.

use crate::deploy::model::{ActionKind, Mapping};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Manifest layout.
///
/// A dotfile repository comes with a __manifest__ at its top-level. The
/// manifest lists every profile the repository can deploy.
///
/// # General Layout
///
/// A manifest is composed of two basic parts: settings and profiles. The
/// settings section configures dotlink itself. Each profile is a named
/// listing of links, where every link pairs a source file in the repository
/// with the target location it should be deployed to.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Manifest {
    /// Settings for dotlink.
    #[serde(default)]
    pub settings: Settings,

    /// Profiles by name.
    #[serde(default, rename = "profile")]
    pub profiles: BTreeMap<String, Profile>,
}

impl Manifest {
    /// Look up a profile by name.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownProfile`] if no profile has that name.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<&Profile> {
        self.profiles
            .get(name.as_ref())
            .ok_or_else(|| ConfigError::UnknownProfile(name.as_ref().to_string()))
    }

    /// Resolve a profile's links into mappings.
    ///
    /// Sources are resolved relative to `root`, the directory housing the
    /// manifest. Relative targets are resolved against `home`.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownProfile`] if no profile has that name.
    /// - Return [`ConfigError::Pattern`] if a glob source is malformed.
    /// - Return [`ConfigError::Glob`] if a glob source cannot be expanded.
    /// - Return [`ConfigError::NoMatches`] if a glob source matches nothing.
    pub fn mappings(
        &self,
        name: impl AsRef<str>,
        root: impl AsRef<Path>,
        home: impl AsRef<Path>,
    ) -> Result<Vec<Mapping>> {
        let profile = self.profile(name)?;
        let mut mappings = Vec::new();
        for link in &profile.links {
            mappings.extend(link.resolve(root.as_ref(), home.as_ref())?);
        }

        Ok(mappings)
    }
}

impl FromStr for Manifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut manifest: Manifest = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path given by the user.
        if let Some(data_dir) = &manifest.settings.data_dir {
            manifest.settings.data_dir = Some(expand(data_dir.to_string_lossy().as_ref())?.into());
        }
        for profile in manifest.profiles.values_mut() {
            for link in &mut profile.links {
                link.target = expand(&link.target)?;
            }
        }

        Ok(manifest)
    }
}

impl Display for Manifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Dotlink settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Directory for state records and backups, `$XDG_DATA_HOME/dotlink`
    /// if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Named listing of links.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Brief description of what the profile deploys.
    #[serde(default)]
    pub description: String,

    /// Links to deploy.
    #[serde(default, rename = "link")]
    pub links: Vec<Link>,
}

/// Pairing of a repository source with its target.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Link {
    /// Source path relative to the repository, may be a glob pattern.
    pub source: String,

    /// Target path, or target directory if source is a glob pattern.
    pub target: String,

    /// How to deploy the source.
    #[serde(default)]
    pub kind: ActionKind,
}

impl Link {
    /// Construct new link.
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
        }
    }

    /// Check if source is a glob pattern.
    pub fn is_glob(&self) -> bool {
        self.source.contains(['*', '?', '['])
    }

    fn resolve(&self, root: &Path, home: &Path) -> Result<Vec<Mapping>> {
        let target = home.join(&self.target);
        if !self.is_glob() {
            return Ok(vec![Mapping::new(root.join(&self.source), target, self.kind)]);
        }

        // INVARIANT: Only the source is a pattern, the repository root is literal.
        let root = glob::Pattern::escape(&root.to_string_lossy());
        let pattern = Path::new(&root).join(&self.source).to_string_lossy().into_owned();
        let mut sources = glob::glob(&pattern)?.collect::<Result<Vec<_>, _>>()?;
        if sources.is_empty() {
            return Err(ConfigError::NoMatches(pattern));
        }
        sources.sort();

        Ok(sources
            .into_iter()
            .filter_map(|source| {
                let name = source.file_name()?.to_owned();
                Some(Mapping::new(source, target.join(name), self.kind))
            })
            .collect())
    }
}

fn expand(path: &str) -> Result<String> {
    Ok(shellexpand::full(path)
        .map_err(ConfigError::ShellExpansion)?
        .into_owned())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Profile is not listed in manifest.
    #[error("no profile named {0:?} in manifest")]
    UnknownProfile(String),

    /// Glob source is malformed.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Glob source cannot be expanded.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    /// Glob source matches nothing.
    #[error("source pattern {0:?} matches nothing")]
    NoMatches(String),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
