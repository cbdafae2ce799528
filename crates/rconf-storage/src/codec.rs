//! Encrypted container for config files.
//!
//! ```text
//! # Encrypted rclone configuration File
//!
//! RCLONE_ENCRYPT_V0:
//! <base64(nonce[24] || XChaCha20-Poly1305 ciphertext+tag)>
//! ```
//!
//! Content whose first significant line is not a sentinel is plaintext and
//! passes through untouched.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Key, XChaCha20Poly1305, XNonce,
};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::key::{EncryptionKey, KeyError, KeyOrigin, Keys};

pub const SENTINEL: &str = "RCLONE_ENCRYPT_V0:";
pub const SENTINEL_PREFIX: &str = "RCLONE_ENCRYPT_V";
pub const BANNER: &str = "# Encrypted rclone configuration File";
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
/// Interactive attempts allowed per decryption before giving up.
pub const MAX_PASSWORD_ATTEMPTS: u32 = 5;

const PASSWORD_PROMPT: &str = "Enter configuration password:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unsupported configuration encryption {found:?} - update for support")]
    UnsupportedVersion { found: String },
    #[error("configuration data too short: {len} bytes, need at least {min}")]
    Truncated { len: usize, min: usize },
    #[error("failed to load base64 encoded data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("couldn't decrypt configuration, most likely wrong password")]
    AuthenticationFailed,
    #[error(
        "unable to decrypt configuration and not allowed to ask for password - \
         set RCLONE_CONFIG_PASS to your configuration password"
    )]
    NoPasswordAvailable,
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Result of looking at the first significant line.
#[derive(Debug, PartialEq, Eq)]
pub enum Content<'a> {
    Plain,
    /// Everything after the sentinel line, still base64.
    Encrypted(&'a [u8]),
}

/// Classify `raw`, skipping blank and `;`/`#` comment lines.
pub fn inspect(raw: &[u8]) -> Result<Content<'_>, CodecError> {
    let mut offset = 0;
    for line in raw.split_inclusive(|b| *b == b'\n') {
        offset += line.len();
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() || text.starts_with(';') || text.starts_with('#') {
            continue;
        }
        if text == SENTINEL {
            return Ok(Content::Encrypted(&raw[offset..]));
        }
        if text.starts_with(SENTINEL_PREFIX) {
            return Err(CodecError::UnsupportedVersion {
                found: text.to_string(),
            });
        }
        return Ok(Content::Plain);
    }
    Ok(Content::Plain)
}

/// Wrap `plaintext` in the container when a key is given; otherwise return it verbatim.
pub fn encrypt(plaintext: &[u8], key: Option<&EncryptionKey>) -> Result<Vec<u8>, CodecError> {
    let Some(key) = key else {
        return Ok(plaintext.to_vec());
    };
    let sealed = seal(key, plaintext)?;

    let mut out = format!("{BANNER}\n\n{SENTINEL}\n").into_bytes();
    out.extend_from_slice(STANDARD.encode(sealed).as_bytes());
    out.push(b'\n');
    Ok(out)
}

/// `nonce || ciphertext+tag` under a fresh random nonce.
pub fn seal(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CodecError::Encrypt(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`seal`].
pub fn open(key: &EncryptionKey, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
    let min = NONCE_LEN + TAG_LEN;
    if sealed.len() < min {
        return Err(CodecError::Truncated {
            len: sealed.len(),
            min,
        });
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CodecError::AuthenticationFailed)
}

/// Decode base64 ignoring line breaks and other whitespace.
fn decode_blob(encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
    let compact: Vec<u8> = encoded
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    Ok(STANDARD.decode(compact)?)
}

/// Turn file content into plaintext, obtaining a key from `keys` when needed.
///
/// A key that fails authentication is discarded and the next source is tried.
/// On success the working key is cached in `keys` for later saves.
pub fn decrypt(raw: &[u8], keys: &mut Keys) -> Result<Vec<u8>, CodecError> {
    let encoded = match inspect(raw)? {
        Content::Plain => return Ok(raw.to_vec()),
        Content::Encrypted(encoded) => encoded,
    };
    let sealed = decode_blob(encoded)?;
    let min = NONCE_LEN + TAG_LEN;
    if sealed.len() < min {
        return Err(CodecError::Truncated {
            len: sealed.len(),
            min,
        });
    }
    open_with_retry(&sealed, keys)
}

enum KeyState {
    NeedKey,
    Decrypting(EncryptionKey, KeyOrigin),
    Failed,
    Succeeded(EncryptionKey, Vec<u8>),
}

fn open_with_retry(sealed: &[u8], keys: &mut Keys) -> Result<Vec<u8>, CodecError> {
    let mut prompts = 0u32;
    let mut state = KeyState::NeedKey;
    loop {
        state = match state {
            KeyState::NeedKey => {
                let (key, origin) = acquire(keys, &mut prompts)?;
                KeyState::Decrypting(key, origin)
            }
            KeyState::Decrypting(key, origin) => match open(&key, sealed) {
                Ok(plaintext) => KeyState::Succeeded(key, plaintext),
                Err(CodecError::AuthenticationFailed) => {
                    error!(?origin, "couldn't decrypt configuration, most likely wrong password");
                    keys.clear();
                    KeyState::Failed
                }
                Err(err) => return Err(err),
            },
            KeyState::Failed => {
                let may_prompt = keys.can_prompt() && prompts < MAX_PASSWORD_ATTEMPTS;
                if keys.has_pending_source() || may_prompt {
                    KeyState::NeedKey
                } else {
                    if keys.can_prompt() {
                        warn!(attempts = prompts, "giving up after repeated wrong passwords");
                    }
                    return Err(CodecError::AuthenticationFailed);
                }
            }
            KeyState::Succeeded(key, plaintext) => {
                keys.set(key);
                return Ok(plaintext);
            }
        };
    }
}

fn acquire(keys: &mut Keys, prompts: &mut u32) -> Result<(EncryptionKey, KeyOrigin), CodecError> {
    if let Some(found) = keys.next_stored()? {
        return Ok(found);
    }
    if !keys.can_prompt() {
        return Err(CodecError::NoPasswordAvailable);
    }
    while *prompts < MAX_PASSWORD_ATTEMPTS {
        let Some(password) = keys.ask(PASSWORD_PROMPT)? else {
            return Err(CodecError::NoPasswordAvailable);
        };
        // Blank entries are re-asked and do not use up an attempt.
        match EncryptionKey::derive_from_password(&password) {
            Ok(key) => {
                *prompts += 1;
                return Ok((key, KeyOrigin::Prompt));
            }
            Err(KeyError::EmptyPassword) => debug!("empty password entered"),
            Err(err) => return Err(err.into()),
        }
    }
    Err(CodecError::AuthenticationFailed)
}
