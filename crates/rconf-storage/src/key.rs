use std::{collections::VecDeque, env, fmt, path::PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;
use tracing::{debug, error};
use zeroize::Zeroize;

use crate::handoff::{self, KEY_FILE_ENV};

pub const KEY_LEN: usize = 32;

/// Environment variable holding the configuration password for non-interactive runs.
pub const PASSWORD_ENV: &str = "RCLONE_CONFIG_PASS";
/// Environment variable that disables prompting when set to `false`.
pub const ASK_PASSWORD_ENV: &str = "RCLONE_ASK_PASSWORD";

/// Fixed Argon2 salt. The container has no salt field, so derivation must be
/// reproducible from the password alone.
const KDF_SALT: &[u8] = b"[rclone-config]";
const KDF_MEMORY_KIB: u32 = 19 * 1024;
const KDF_TIME_COST: u32 = 3;
const KDF_PARALLELISM: u32 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("password must not be empty")]
    EmptyPassword,
    #[error("key derivation failed: {0}")]
    Derivation(String),
    #[error("expected {KEY_LEN} key bytes, got {0}")]
    InvalidLength(usize),
    #[error("config key handoff via {path:?} failed: {reason}")]
    Handoff { path: PathBuf, reason: String },
    #[error("obscured value invalid: {0}")]
    Obscure(String),
    #[error("password prompt failed: {0}")]
    Prompt(String),
    #[error("no password entered")]
    NoInput,
}

/// 256-bit symmetric key for the config container. Zeroed on drop; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self { bytes })
    }

    /// Derive a key with Argon2id. Surrounding whitespace in the password is ignored.
    pub fn derive_from_password(password: &str) -> Result<Self, KeyError> {
        let password = password.trim();
        if password.is_empty() {
            return Err(KeyError::EmptyPassword);
        }
        let params = Params::new(
            KDF_MEMORY_KIB,
            KDF_TIME_COST,
            KDF_PARALLELISM,
            Some(KEY_LEN),
        )
        .map_err(|e| KeyError::Derivation(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut bytes = [0u8; KEY_LEN];
        argon2
            .hash_password_into(password.as_bytes(), KDF_SALT, &mut bytes)
            .map_err(|e| KeyError::Derivation(e.to_string()))?;
        let key = Self { bytes };
        bytes.zeroize();
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Source of interactively entered passwords (a terminal in production; scripted in tests).
pub trait PasswordPrompt: Send {
    /// Ask for a password. `Ok(None)` means the user cannot provide more input.
    fn ask(&mut self, prompt: &str) -> Result<Option<String>, KeyError>;
}

/// Prompt that never has an answer, for callers that must not block on input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl PasswordPrompt for NoPrompt {
    fn ask(&mut self, _prompt: &str) -> Result<Option<String>, KeyError> {
        Ok(None)
    }
}

/// Replays a fixed list of answers, then reports end of input.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
        }
    }
}

impl PasswordPrompt for ScriptedPrompt {
    fn ask(&mut self, _prompt: &str) -> Result<Option<String>, KeyError> {
        Ok(self.answers.pop_front())
    }
}

/// Key-related runtime inputs, normally taken from the environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KeySettings {
    /// Password used without prompting.
    pub password: Option<String>,
    /// One-shot obscured key file left by a parent process.
    pub key_file: Option<PathBuf>,
    /// Whether a missing or wrong key may trigger an interactive prompt.
    pub ask_password: bool,
}

impl KeySettings {
    pub fn from_env() -> Self {
        let password = env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty());
        let key_file = env::var_os(KEY_FILE_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let ask_password = env::var(ASK_PASSWORD_ENV)
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);
        Self {
            password,
            key_file,
            ask_password,
        }
    }
}

impl fmt::Debug for KeySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySettings")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_file", &self.key_file)
            .field("ask_password", &self.ask_password)
            .finish()
    }
}

/// Where the next decryption attempt's key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Cached,
    Handoff,
    Environment,
    Prompt,
}

/// Holds the process's key and the remaining places a key may come from.
///
/// Sources are tried in order: the cached key, the handoff file, the
/// environment password, then the interactive prompt. The handoff file and the
/// environment password are each consulted at most once.
pub struct Keys {
    cached: Option<EncryptionKey>,
    handoff: Option<PathBuf>,
    env_password: Option<String>,
    ask_password: bool,
    prompt: Box<dyn PasswordPrompt>,
}

impl Keys {
    pub fn new(settings: KeySettings, prompt: Box<dyn PasswordPrompt>) -> Self {
        Self {
            cached: None,
            handoff: settings.key_file,
            env_password: settings.password,
            ask_password: settings.ask_password,
            prompt,
        }
    }

    /// No key sources at all; content stays plaintext unless a password is set later.
    pub fn none() -> Self {
        Self::new(KeySettings::default(), Box::new(NoPrompt))
    }

    pub fn current(&self) -> Option<&EncryptionKey> {
        self.cached.as_ref()
    }

    pub fn set(&mut self, key: EncryptionKey) {
        self.cached = Some(key);
    }

    pub fn clear(&mut self) {
        self.cached = None;
    }

    pub fn set_password(&mut self, password: &str) -> Result<(), KeyError> {
        self.cached = Some(EncryptionKey::derive_from_password(password)?);
        Ok(())
    }

    pub fn can_prompt(&self) -> bool {
        self.ask_password
    }

    /// Ask the prompt directly, regardless of `ask_password`.
    pub fn ask(&mut self, prompt: &str) -> Result<Option<String>, KeyError> {
        self.prompt.ask(prompt)
    }

    /// Whether a one-shot source is still pending.
    pub(crate) fn has_pending_source(&self) -> bool {
        self.handoff.is_some() || self.env_password.is_some()
    }

    /// Delete an unused handoff file so key material does not linger on disk.
    pub fn discard_handoff(&mut self) {
        if let Some(path) = self.handoff.take() {
            handoff::discard(&path);
        }
    }

    /// Cache a key derived from the environment password when no key is held
    /// yet, so that saves are encrypted whatever the file on disk contains.
    pub(crate) fn adopt_env_password(&mut self) {
        if self.cached.is_some() {
            return;
        }
        let Some(password) = self.env_password.take() else {
            return;
        };
        match EncryptionKey::derive_from_password(&password) {
            Ok(key) => {
                debug!("using {PASSWORD_ENV} password");
                self.cached = Some(key);
            }
            Err(err) => error!("using {PASSWORD_ENV} returned: {err}"),
        }
    }

    /// Next non-interactive key, consuming one-shot sources as they are tried.
    pub(crate) fn next_stored(&mut self) -> Result<Option<(EncryptionKey, KeyOrigin)>, KeyError> {
        if let Some(key) = &self.cached {
            return Ok(Some((key.clone(), KeyOrigin::Cached)));
        }
        if let Some(path) = self.handoff.take() {
            debug!(?path, "attempting to obtain config key from handoff file");
            let key = handoff::take(&path)?;
            debug!("using handoff file for config key");
            return Ok(Some((key, KeyOrigin::Handoff)));
        }
        if let Some(password) = self.env_password.take() {
            match EncryptionKey::derive_from_password(&password) {
                Ok(key) => {
                    debug!("using {PASSWORD_ENV} password");
                    return Ok(Some((key, KeyOrigin::Environment)));
                }
                Err(err) => error!("using {PASSWORD_ENV} returned: {err}"),
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("cached", &self.cached)
            .field("handoff", &self.handoff)
            .field("env_password", &self.env_password.as_ref().map(|_| "<redacted>"))
            .field("ask_password", &self.ask_password)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_trims() {
        let a = EncryptionKey::derive_from_password("hunter2").expect("derive");
        let b = EncryptionKey::derive_from_password("  hunter2\n").expect("derive");
        let c = EncryptionKey::derive_from_password("hunter3").expect("derive");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empty_password_is_rejected() {
        let err = EncryptionKey::derive_from_password("   ").expect_err("empty");
        assert_eq!(err, KeyError::EmptyPassword);
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        let err = EncryptionKey::from_slice(&[0u8; 16]).expect_err("short");
        assert_eq!(err, KeyError::InvalidLength(16));
    }

    #[test]
    fn debug_never_shows_key_bytes() {
        let key = EncryptionKey::from_bytes([0xAB; KEY_LEN]);
        let printed = format!("{key:?}");
        assert!(!printed.contains("171"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn cached_key_wins_and_env_is_one_shot() {
        let mut keys = Keys::new(
            KeySettings {
                password: Some("from-env".into()),
                key_file: None,
                ask_password: false,
            },
            Box::new(NoPrompt),
        );

        let (_, origin) = keys.next_stored().expect("ok").expect("env key");
        assert_eq!(origin, KeyOrigin::Environment);
        assert!(keys.next_stored().expect("ok").is_none());

        keys.set(EncryptionKey::from_bytes([1; KEY_LEN]));
        let (key, origin) = keys.next_stored().expect("ok").expect("cached");
        assert_eq!(origin, KeyOrigin::Cached);
        assert_eq!(key.as_bytes(), &[1; KEY_LEN]);
    }

    #[test]
    fn scripted_prompt_runs_dry() {
        let mut prompt = ScriptedPrompt::new(["one"]);
        assert_eq!(prompt.ask("?").expect("ask").as_deref(), Some("one"));
        assert_eq!(prompt.ask("?").expect("ask"), None);
    }

    #[test]
    fn env_password_is_adopted_only_without_a_key() {
        let settings = KeySettings {
            password: Some("from-env".into()),
            ..KeySettings::default()
        };
        let mut keys = Keys::new(settings.clone(), Box::new(NoPrompt));
        keys.adopt_env_password();
        let expected = EncryptionKey::derive_from_password("from-env").expect("derive");
        assert_eq!(keys.current(), Some(&expected));
        assert!(!keys.has_pending_source());

        let mut keys = Keys::new(settings, Box::new(NoPrompt));
        keys.set(EncryptionKey::from_bytes([2; KEY_LEN]));
        keys.adopt_env_password();
        assert_eq!(keys.current().map(|k| *k.as_bytes()), Some([2; KEY_LEN]));
    }
}
