// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! File system operations used by deployment.
//!
//! Every mutation the deployer performs goes through [`FileOps`], so
//! callers can observe or sabotage deployment without touching the real
//! disk logic. Read-only inspection is done directly through free functions
//! in this module.

use sha2::{Digest, Sha256};
use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::debug;
use walkdir::WalkDir;

/// Mutating file system operations needed for deployment.
pub trait FileOps {
    /// Copy file, symlink, or directory tree at `from` to `to`.
    ///
    /// Symlinks are copied as symlinks, never followed. Directory modes are
    /// kept. Fails with [`io::ErrorKind::AlreadyExists`] if `to` is occupied.
    fn copy_all(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Create symlink at `target` pointing to `source`.
    fn symlink(&self, source: &Path, target: &Path) -> io::Result<()>;

    /// Remove file, symlink, or directory tree at `path`.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// Move `from` to `to`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Create a single directory.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Remove a single empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
}

/// File operations on the host file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFs;

impl FileOps for HostFs {
    fn copy_all(&self, from: &Path, to: &Path) -> io::Result<()> {
        if occupied(to)? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{:?} already exists", to.display()),
            ));
        }

        let metadata = fs::symlink_metadata(from)?;
        if metadata.file_type().is_symlink() {
            return copy_symlink(from, to);
        }

        if !metadata.is_dir() {
            fs::copy(from, to)?;
            return Ok(());
        }

        // INVARIANT: Directory modes are applied last, innermost first, so a
        // read-only directory can still be filled.
        let mut modes = Vec::new();
        for entry in WalkDir::new(from).follow_links(false) {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(from)
                .map_err(io::Error::other)?;
            let out = to.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir(&out)?;
                modes.push((out, entry.metadata().map_err(io::Error::from)?.permissions()));
            } else if entry.file_type().is_symlink() {
                copy_symlink(entry.path(), &out)?;
            } else {
                fs::copy(entry.path(), &out)?;
            }
        }

        for (dir, permissions) in modes.into_iter().rev() {
            fs::set_permissions(dir, permissions)?;
        }

        Ok(())
    }

    fn symlink(&self, source: &Path, target: &Path) -> io::Result<()> {
        make_symlink(source, target)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let metadata = fs::symlink_metadata(path)?;
        if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(err) if is_cross_device(&err) => {
                if let Err(err) = self.copy_all(from, to) {
                    if occupied(to).unwrap_or(false) && self.remove_all(to).is_err() {
                        debug!("partial copy left at {:?}", to.display());
                    }
                    return Err(err);
                }
                self.remove_all(from)
            }
            Err(err) => Err(err),
        }
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }
}

/// Check if anything occupies `path`, dangling symlinks included.
pub fn occupied(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Check if `target` is a symlink pointing exactly at `source`.
pub fn links_to(target: &Path, source: &Path) -> bool {
    fs::read_link(target).is_ok_and(|dest| dest == source)
}

/// Compare two paths by content.
///
/// Files compare by bytes, symlinks by destination, and directories
/// recursively by entry names and content. Nothing is followed.
pub fn same_contents(left: &Path, right: &Path) -> io::Result<bool> {
    let lhs = fs::symlink_metadata(left)?;
    let rhs = fs::symlink_metadata(right)?;
    let (lhs, rhs) = (lhs.file_type(), rhs.file_type());

    if lhs.is_symlink() || rhs.is_symlink() {
        return Ok(lhs.is_symlink()
            && rhs.is_symlink()
            && fs::read_link(left)? == fs::read_link(right)?);
    }

    if lhs.is_dir() != rhs.is_dir() {
        return Ok(false);
    }

    if !lhs.is_dir() {
        if fs::metadata(left)?.len() != fs::metadata(right)?.len() {
            return Ok(false);
        }
        return Ok(fs::read(left)? == fs::read(right)?);
    }

    let lhs_entries = sorted_entries(left)?;
    let rhs_entries = sorted_entries(right)?;
    if lhs_entries != rhs_entries {
        return Ok(false);
    }

    for name in lhs_entries {
        if !same_contents(&left.join(&name), &right.join(&name))? {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Create missing ancestors of `path`.
///
/// Returns every directory that had to be created, outermost first.
pub fn ensure_parent_dirs(ops: &impl FileOps, path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || occupied(dir)? {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }

    missing.reverse();
    for (index, dir) in missing.iter().enumerate() {
        if let Err(err) = ops.create_dir(dir) {
            for made in missing[..index].iter().rev() {
                if ops.remove_dir(made).is_err() {
                    debug!("left directory {:?} in place", made.display());
                }
            }
            return Err(err);
        }
    }

    Ok(missing)
}

/// Hex encoded SHA-256 digest of a file, symlink, or directory tree.
///
/// Directory entries are hashed in name order together with their relative
/// paths, so renames and added files change the digest too. Symlinks hash
/// their destination. Nothing is followed.
pub fn digest(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(path)
        .follow_links(false)
        .follow_root_links(false)
        .sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(path)
            .map_err(io::Error::other)?;
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\0");

        if entry.file_type().is_symlink() {
            hasher.update(b"l");
            hasher.update(fs::read_link(entry.path())?.to_string_lossy().as_bytes());
        } else if entry.file_type().is_dir() {
            hasher.update(b"d");
        } else {
            hasher.update(b"f");
            hasher.update(fs::read(entry.path())?);
        }
        hasher.update(b"\0");
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Pick first unoccupied path among `base`, `base.1`, `base.2`, ...
pub fn unique_path(base: PathBuf) -> io::Result<PathBuf> {
    if !occupied(&base)? {
        return Ok(base);
    }

    let mut counter = 1usize;
    loop {
        let mut name = OsString::from(base.as_os_str());
        name.push(format!(".{counter}"));
        let candidate = PathBuf::from(name);
        if !occupied(&candidate)? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<OsString>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let dest = fs::read_link(from)?;
    make_symlink(&dest, to)
}

#[cfg(unix)]
fn make_symlink(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(windows)]
fn make_symlink(source: &Path, target: &Path) -> io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, target)
    } else {
        std::os::windows::fs::symlink_file(source, target)
    }
}

// EXDEV on Linux and the BSDs.
#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(18)
}

#[cfg(windows)]
fn is_cross_device(err: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    err.raw_os_error() == Some(17)
}
