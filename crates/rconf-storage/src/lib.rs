//! Encrypted persistence for rclone-style remote configuration.
//! XChaCha20-Poly1305 container with Argon2id password keys, atomic file
//! replacement, and the load/save orchestration that ties them together.

pub mod atomic;
pub mod codec;
pub mod handoff;
pub mod key;
pub mod obscure;
pub mod store;

pub use codec::CodecError;
pub use key::{EncryptionKey, KeyError, KeySettings, Keys, PasswordPrompt};
pub use store::{ConfigStore, StoreError, StoreOptions};
