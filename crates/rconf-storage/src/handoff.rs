//! One-shot hand-over of a derived key to a child process, so the child does
//! not have to prompt again. The file holds the key obscured and is deleted by
//! the reader after a single read attempt, successful or not.

use std::{
    env, fs,
    io::Write,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{
    key::{EncryptionKey, KeyError},
    obscure,
};

/// Environment variable naming the handoff file for a child process.
pub const KEY_FILE_ENV: &str = "_RCLONE_CONFIG_KEY_FILE";

/// Write `key` obscured to a new private file in `dir` (the system temp dir by
/// default) and return its path. The caller passes the path to the child via
/// [`KEY_FILE_ENV`].
pub fn write(key: &EncryptionKey, dir: Option<&Path>) -> Result<PathBuf, KeyError> {
    let dir = dir.map(Path::to_path_buf).unwrap_or_else(env::temp_dir);
    let fail = |reason: String| KeyError::Handoff {
        path: dir.clone(),
        reason,
    };

    let encoded = obscure::obscure(key.as_bytes())?;
    let mut tmp = tempfile::Builder::new()
        .prefix("rconf-key-")
        .tempfile_in(&dir)
        .map_err(|e| fail(format!("create failed: {e}")))?;
    tmp.write_all(encoded.as_bytes())
        .and_then(|_| tmp.flush())
        .map_err(|e| fail(format!("write failed: {e}")))?;
    let (_, path) = tmp.keep().map_err(|e| fail(format!("keep failed: {}", e.error)))?;
    debug!(?path, "wrote config key handoff file");
    Ok(path)
}

/// Read the key from `path`, deleting the file whatever the outcome.
pub fn take(path: &Path) -> Result<EncryptionKey, KeyError> {
    let read = fs::read_to_string(path);
    let removed = fs::remove_file(path);

    let encoded = read.map_err(|e| KeyError::Handoff {
        path: path.to_path_buf(),
        reason: match &removed {
            Ok(()) => format!("unable to read obscured config key: {e}"),
            Err(rm) => format!(
                "unable to read obscured config key and unable to delete the file: {e}; {rm}"
            ),
        },
    })?;
    removed.map_err(|e| KeyError::Handoff {
        path: path.to_path_buf(),
        reason: format!("unable to delete file with config key: {e}"),
    })?;

    let bytes = obscure::reveal(&encoded)?;
    EncryptionKey::from_slice(&bytes)
}

/// Remove an unused handoff file.
pub(crate) fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(?path, "removed unused config key handoff file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(?path, "failed to remove config key handoff file: {err}"),
    }
}
