//! Crash-safe replacement of the config file.
//!
//! The new content is staged in a temp file beside the target, then committed
//! with a rename. Until the commit the target (or, briefly, its `.old` backup)
//! still holds the previous content, never a partial write.

use std::{
    ffi::OsString,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const BACKUP_SUFFIX: &str = ".old";
/// Mode for a config file that does not exist yet: owner read/write only.
pub const DEFAULT_MODE: u32 = 0o600;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to create config directory {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to create temp file for new config in {path:?}: {source}")]
    TempFile { path: PathBuf, source: io::Error },
    #[error("failed to write temp config file {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to move previous config {path:?} to backup location: {source}")]
    Backup { path: PathBuf, source: io::Error },
    #[error("failed to move newly written config from {from:?} to {to:?}: {source}")]
    Commit {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// `<target>.old`
pub fn backup_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Atomically replace `target` with `content`, keeping its mode and group.
pub fn replace(target: &Path, content: &[u8]) -> Result<(), WriteError> {
    let staged = Staged::prepare(target, content)?;
    staged.rotate_backup()?;
    staged.commit()
}

/// New content written to a temp file next to the target, not yet visible.
/// Dropping it removes the temp file.
struct Staged<'a> {
    target: &'a Path,
    backup: PathBuf,
    tmp: NamedTempFile,
}

impl<'a> Staged<'a> {
    fn prepare(target: &'a Path, content: &[u8]) -> Result<Self, WriteError> {
        let dir = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|source| WriteError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let prefix = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("config"));
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(dir)
            .map_err(|source| WriteError::TempFile {
                path: dir.to_path_buf(),
                source,
            })?;

        let written = tmp
            .write_all(content)
            .and_then(|_| tmp.flush())
            .and_then(|_| tmp.as_file().sync_all());
        if let Err(source) = written {
            return Err(WriteError::Write {
                path: tmp.path().to_path_buf(),
                source,
            });
        }

        let mode = resolve_mode(target);
        copy_group(target, tmp.path());
        if let Err(err) = set_mode(tmp.path(), mode) {
            error!(path = ?tmp.path(), "failed to set permissions on config file: {err}");
        }

        Ok(Self {
            target,
            backup: backup_path(target),
            tmp,
        })
    }

    /// Move the current target aside. A missing target is fine (first save).
    fn rotate_backup(&self) -> Result<(), WriteError> {
        match fs::rename(self.target, &self.backup) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WriteError::Backup {
                path: self.target.to_path_buf(),
                source,
            }),
        }
    }

    /// Rename the temp file onto the target, then drop the backup.
    fn commit(self) -> Result<(), WriteError> {
        let Self {
            target,
            backup,
            tmp,
        } = self;
        let from = tmp.path().to_path_buf();

        if let Err(err) = tmp.persist(target) {
            restore_backup(&backup, target);
            return Err(WriteError::Commit {
                from,
                to: target.to_path_buf(),
                source: err.error,
            });
        }
        debug!(path = ?target, "config file replaced");

        match fs::remove_file(&backup) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => error!(path = ?backup, "failed to remove backup config file: {err}"),
        }
        Ok(())
    }
}

fn restore_backup(backup: &Path, target: &Path) {
    if !backup.exists() || target.exists() {
        return;
    }
    if let Err(err) = fs::rename(backup, target) {
        warn!(?backup, "failed to restore previous config from backup: {err}");
    }
}

#[cfg(unix)]
fn resolve_mode(target: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    match fs::metadata(target) {
        Ok(meta) => {
            let mode = meta.permissions().mode() & 0o7777;
            if mode != DEFAULT_MODE {
                debug!("keeping previous permissions for config file: {mode:o}");
            }
            mode
        }
        Err(_) => {
            debug!("using default permissions for config file: {DEFAULT_MODE:o}");
            DEFAULT_MODE
        }
    }
}

#[cfg(not(unix))]
fn resolve_mode(_target: &Path) -> u32 {
    DEFAULT_MODE
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Best effort: give the new file the group of the file it replaces.
#[cfg(unix)]
fn copy_group(from: &Path, to: &Path) {
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = fs::metadata(from) else {
        return;
    };
    if let Err(err) = std::os::unix::fs::chown(to, None, Some(meta.gid())) {
        debug!("failed to keep previous group for config file: {err}");
    }
}

#[cfg(not(unix))]
fn copy_group(_from: &Path, _to: &Path) {}
