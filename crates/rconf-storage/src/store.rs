use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use rand::Rng;
use rconf_core::{Provider, ProviderError, ProviderRegistry, RemoteConfig};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    atomic::{self, WriteError},
    codec::{self, CodecError},
    handoff,
    key::{KeyError, Keys},
};

pub const DEFAULT_LOW_LEVEL_RETRIES: u32 = 10;
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read config file {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to decode config file {path:?}: {source}")]
    Codec { path: PathBuf, source: CodecError },
    #[error("config format error for {path:?}: {source}")]
    Provider {
        path: PathBuf,
        source: ProviderError,
    },
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("failed to save config after {attempts} tries: {source}")]
    SaveExhausted {
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },
    #[error("remote {0:?} not found")]
    RemoteNotFound(String),
    #[error("passwords did not match")]
    PasswordMismatch,
}

impl StoreError {
    /// The codec failure behind this error, if any.
    pub fn codec(&self) -> Option<&CodecError> {
        match self {
            StoreError::Codec { source, .. } => Some(source),
            StoreError::SaveExhausted { source, .. } => source.codec(),
            _ => None,
        }
    }
}

/// Save retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Extra attempts after the first failed save.
    pub low_level_retries: u32,
    /// Upper bound of the random pause between save attempts.
    pub max_backoff: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            low_level_retries: DEFAULT_LOW_LEVEL_RETRIES,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Owns the in-memory remotes for the life of the process and moves them to
/// and from the config file: read, decrypt, parse on load; serialize,
/// encrypt, atomically replace on save.
pub struct ConfigStore {
    path: PathBuf,
    provider: Box<dyn Provider>,
    remotes: RemoteConfig,
    keys: Keys,
    options: StoreOptions,
}

impl ConfigStore {
    /// Select the format for `path`. Nothing is read until [`ConfigStore::load`].
    pub fn new(
        path: impl Into<PathBuf>,
        registry: &ProviderRegistry,
        keys: Keys,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let provider = registry
            .for_path(&path)
            .map_err(|source| StoreError::Provider {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            provider,
            remotes: RemoteConfig::new(),
            keys,
            options,
        })
    }

    /// [`ConfigStore::new`] followed by [`ConfigStore::load`].
    pub fn open(
        path: impl Into<PathBuf>,
        registry: &ProviderRegistry,
        keys: Keys,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let mut store = Self::new(path, registry, keys, options)?;
        store.load()?;
        Ok(store)
    }

    /// Replace the in-memory remotes with the file's content. A missing file
    /// yields an empty config.
    #[instrument(skip_all, fields(path = ?self.path))]
    pub fn load(&mut self) -> Result<(), StoreError> {
        self.keys.adopt_env_password();
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("config file {:?} not found - using defaults", self.path);
                self.keys.discard_handoff();
                self.remotes = RemoteConfig::new();
                return Ok(());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let decoded = codec::decrypt(&raw, &mut self.keys);
        self.keys.discard_handoff();
        let plaintext = decoded.map_err(|source| StoreError::Codec {
            path: self.path.clone(),
            source,
        })?;

        self.remotes = self
            .provider
            .load(&plaintext)
            .map_err(|source| StoreError::Provider {
                path: self.path.clone(),
                source,
            })?;
        debug!(
            remotes = self.remotes.len(),
            encrypted = self.is_encrypted(),
            "using config file from {:?}",
            self.path
        );
        Ok(())
    }

    /// Write the remotes back, retrying with random backoff on failure.
    #[instrument(skip_all, fields(path = ?self.path))]
    pub fn save(&self) -> Result<(), StoreError> {
        self.save_with_pause(|_| thread::sleep(self.backoff()))
    }

    /// Retry loop behind [`ConfigStore::save`]; `pause` runs between attempts
    /// with the number of the attempt that just failed.
    fn save_with_pause(&self, mut pause: impl FnMut(u32)) -> Result<(), StoreError> {
        let attempts = self.options.low_level_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            let err = match self.save_once() {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            warn!(attempt, attempts, "failed to save config: {err}");
            if attempt >= attempts {
                return Err(StoreError::SaveExhausted {
                    attempts,
                    source: Box::new(err),
                });
            }
            pause(attempt);
            attempt += 1;
        }
    }

    fn save_once(&self) -> Result<(), StoreError> {
        let plaintext = self.plaintext_bytes()?;
        let content = codec::encrypt(&plaintext, self.keys.current()).map_err(|source| {
            StoreError::Codec {
                path: self.path.clone(),
                source,
            }
        })?;
        atomic::replace(&self.path, &content)?;
        Ok(())
    }

    fn backoff(&self) -> Duration {
        let max = self.options.max_backoff.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max))
    }

    fn plaintext_bytes(&self) -> Result<Vec<u8>, StoreError> {
        self.provider
            .save(&self.remotes)
            .map_err(|source| StoreError::Provider {
                path: self.path.clone(),
                source,
            })
    }

    /// The unencrypted file body the current remotes serialize to.
    pub fn to_plaintext(&self) -> Result<String, StoreError> {
        let bytes = self.plaintext_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn remotes(&self) -> &RemoteConfig {
        &self.remotes
    }

    pub fn remotes_mut(&mut self) -> &mut RemoteConfig {
        &mut self.remotes
    }

    /// Option `key` of `remote`, or `None` if either is missing.
    pub fn get_value(&self, remote: &str, key: &str) -> Option<&str> {
        self.remotes.get_remote(remote)?.get_string(key)
    }

    /// Set an option, creating the remote if needed.
    pub fn set_value(&mut self, remote: &str, key: &str, value: &str) {
        self.remotes.create_remote(remote).set_string(key, value);
    }

    pub fn is_encrypted(&self) -> bool {
        self.keys.current().is_some()
    }

    /// Derive a key from `password`; later saves are encrypted with it.
    pub fn set_password(&mut self, password: &str) -> Result<(), StoreError> {
        self.keys.set_password(password)?;
        Ok(())
    }

    /// Ask for a new password twice through the configured prompt and use it.
    pub fn change_password(&mut self) -> Result<(), StoreError> {
        if !self.keys.can_prompt() {
            return Err(KeyError::NoInput.into());
        }
        let first = self
            .keys
            .ask("Enter NEW configuration password:")?
            .ok_or(KeyError::NoInput)?;
        let second = self
            .keys
            .ask("Confirm NEW configuration password:")?
            .ok_or(KeyError::NoInput)?;
        if first != second {
            return Err(StoreError::PasswordMismatch);
        }
        self.set_password(&first)
    }

    /// Forget the key; later saves are plaintext.
    pub fn clear_password(&mut self) {
        self.keys.clear();
    }

    /// Write the current key to a one-shot handoff file for a child process.
    /// Returns `None` when the config is not encrypted.
    pub fn export_key_for_child(&self, dir: Option<&Path>) -> Result<Option<PathBuf>, StoreError> {
        let Some(key) = self.keys.current() else {
            return Ok(None);
        };
        Ok(Some(handoff::write(key, dir)?))
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .field("provider", &self.provider.name())
            .field("remotes", &self.remotes.len())
            .field("keys", &self.keys)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{EncryptionKey, KeySettings, ScriptedPrompt, KEY_LEN};

    fn no_wait() -> StoreOptions {
        StoreOptions {
            low_level_retries: 2,
            max_backoff: Duration::ZERO,
        }
    }

    fn store_at(path: &Path, keys: Keys) -> ConfigStore {
        ConfigStore::open(path, &ProviderRegistry::with_builtin(), keys, no_wait()).expect("open")
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_at(&dir.path().join("rclone.conf"), Keys::none());
        assert!(store.remotes().is_empty());
        assert_eq!(store.provider_name(), "ini");
    }

    #[test]
    fn unknown_extension_fails_on_construction() {
        let err = ConfigStore::new(
            "remotes.yaml",
            &ProviderRegistry::with_builtin(),
            Keys::none(),
            no_wait(),
        )
        .expect_err("unknown");
        assert!(matches!(
            err,
            StoreError::Provider {
                source: ProviderError::UnknownFormat { .. },
                ..
            }
        ));
    }

    #[test]
    fn plaintext_save_is_readable_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rclone.conf");
        let mut store = store_at(&path, Keys::none());
        store.set_value("remote1", "type", "local");
        store.save().expect("save");

        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(text, "[remote1]\ntype = local\n");
    }

    fn unloaded_store_at(path: &Path, keys: Keys) -> ConfigStore {
        ConfigStore::new(path, &ProviderRegistry::with_builtin(), keys, no_wait()).expect("new")
    }

    #[test]
    fn env_password_encrypts_new_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rclone.conf");
        let keys = Keys::new(
            KeySettings {
                password: Some("secret".into()),
                ..KeySettings::default()
            },
            Box::new(crate::key::NoPrompt),
        );
        let mut store = store_at(&path, keys);
        assert!(store.is_encrypted());
        store.set_value("r", "pass", "hunter2");
        store.save().expect("save");

        let text = fs::read_to_string(&path).expect("read");
        assert!(text.contains(codec::SENTINEL));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn env_password_encrypts_plaintext_file_on_next_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rclone.conf");
        fs::write(&path, "[r]\ntype = local\n").expect("seed");
        let keys = Keys::new(
            KeySettings {
                password: Some("secret".into()),
                ..KeySettings::default()
            },
            Box::new(crate::key::NoPrompt),
        );
        let store = store_at(&path, keys);
        assert_eq!(store.get_value("r", "type"), Some("local"));
        store.save().expect("save");
        assert!(fs::read_to_string(&path).expect("read").contains(codec::SENTINEL));
    }

    #[test]
    fn save_retries_then_reports_exhaustion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").expect("seed");

        let store = unloaded_store_at(&blocker.join("rclone.conf"), Keys::none());
        let err = store.save().expect_err("should exhaust");
        match err {
            StoreError::SaveExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, StoreError::Write(WriteError::CreateDir { .. })));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn save_recovers_after_failed_attempt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").expect("seed");
        let path = blocker.join("rclone.conf");

        let mut store = unloaded_store_at(&path, Keys::none());
        store.set_value("r", "type", "local");
        let mut pauses = Vec::new();
        store
            .save_with_pause(|attempt| {
                pauses.push(attempt);
                fs::remove_file(&blocker).expect("unblock");
            })
            .expect("second attempt succeeds");

        assert_eq!(pauses, vec![1]);
        assert_eq!(fs::read_to_string(&path).expect("read"), "[r]\ntype = local\n");
    }

    #[test]
    fn change_password_refuses_when_prompting_is_off() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys = Keys::new(
            KeySettings {
                ask_password: false,
                ..KeySettings::default()
            },
            Box::new(ScriptedPrompt::new(["pw", "pw"])),
        );
        let mut store = store_at(&dir.path().join("rclone.conf"), keys);
        assert!(matches!(
            store.change_password(),
            Err(StoreError::Key(KeyError::NoInput))
        ));
        assert!(!store.is_encrypted());
    }

    #[test]
    fn clear_password_switches_back_to_plaintext() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rclone.conf");
        let mut store = store_at(&path, Keys::none());
        store.set_value("r", "type", "local");
        store.set_password("pw").expect("set password");
        store.save().expect("save");
        assert!(fs::read_to_string(&path).expect("read").contains(codec::SENTINEL));

        store.clear_password();
        store.save().expect("save");
        assert!(!fs::read_to_string(&path).expect("read").contains(codec::SENTINEL));
    }

    #[test]
    fn change_password_requires_matching_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rclone.conf");
        let prompt = ScriptedPrompt::new(["first", "second", "same", "same"]);
        let keys = Keys::new(
            KeySettings {
                ask_password: true,
                ..KeySettings::default()
            },
            Box::new(prompt),
        );
        let mut store = store_at(&path, keys);

        assert!(matches!(
            store.change_password(),
            Err(StoreError::PasswordMismatch)
        ));
        assert!(!store.is_encrypted());
        store.change_password().expect("matching");
        assert!(store.is_encrypted());
    }

    #[test]
    fn handoff_key_decrypts_in_child_and_is_consumed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rclone.conf");
        let mut parent = store_at(&path, Keys::none());
        parent.set_value("r", "type", "local");
        parent
            .keys
            .set(EncryptionKey::from_bytes([6; KEY_LEN]));
        parent.save().expect("save");

        let handoff = parent
            .export_key_for_child(Some(dir.path()))
            .expect("export")
            .expect("encrypted");
        let child_keys = Keys::new(
            KeySettings {
                key_file: Some(handoff.clone()),
                ..KeySettings::default()
            },
            Box::new(crate::key::NoPrompt),
        );
        let child = store_at(&path, child_keys);
        assert_eq!(child.get_value("r", "type"), Some("local"));
        assert!(!handoff.exists());
    }

    #[test]
    fn unused_handoff_file_is_removed_for_plaintext_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rclone.conf");
        fs::write(&path, "[r]\ntype = local\n").expect("seed");
        let handoff = handoff::write(&EncryptionKey::from_bytes([1; KEY_LEN]), Some(dir.path()))
            .expect("handoff");

        let keys = Keys::new(
            KeySettings {
                key_file: Some(handoff.clone()),
                ..KeySettings::default()
            },
            Box::new(crate::key::NoPrompt),
        );
        let store = store_at(&path, keys);
        assert!(store.remotes().has_remote("r"));
        assert!(!handoff.exists());
    }

    #[test]
    fn export_without_key_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_at(&dir.path().join("rclone.conf"), Keys::none());
        assert!(store.export_key_for_child(None).expect("export").is_none());
    }
}
