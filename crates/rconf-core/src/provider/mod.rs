//! Pluggable on-disk formats. A provider only transcodes between plaintext bytes
//! and a [`RemoteConfig`]; it never touches the filesystem or the encryption layer.

pub mod ini;
pub mod json;
pub mod toml_file;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::remote::RemoteConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Input could not be parsed; `line` is 1-based where the format reports one.
    #[error("parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },
    /// A remote or option name cannot be represented in this format.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
    /// An option value cannot be represented in this format.
    #[error("invalid value for {remote}.{key}: {reason}")]
    InvalidValue {
        remote: String,
        key: String,
        reason: String,
    },
    #[error("serialize failed: {reason}")]
    Serialize { reason: String },
    /// No registered provider claims the config file's extension.
    #[error("no config format registered for {path:?}")]
    UnknownFormat { path: PathBuf },
}

/// Contract implemented by each on-disk format.
pub trait Provider: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// Parse already-decrypted file content.
    fn load(&self, plaintext: &[u8]) -> Result<RemoteConfig, ProviderError>;

    /// Serialize to unencrypted file content.
    fn save(&self, config: &RemoteConfig) -> Result<Vec<u8>, ProviderError>;
}

/// Describes how to build a provider and which file extensions it claims.
#[derive(Debug, Clone, Copy)]
pub struct ProviderDefinition {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub constructor: fn() -> Box<dyn Provider>,
}

/// Maps file extensions to provider constructors. Formats join by calling their
/// module's `register` function.
#[derive(Debug, Default, Clone)]
pub struct ProviderRegistry {
    definitions: Vec<ProviderDefinition>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every format shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        ini::register(&mut registry);
        json::register(&mut registry);
        toml_file::register(&mut registry);
        registry
    }

    pub fn register(&mut self, definition: ProviderDefinition) {
        self.definitions.push(definition);
    }

    /// Instantiate the first provider that claims `path`'s extension (case-insensitive).
    pub fn for_path(&self, path: &Path) -> Result<Box<dyn Provider>, ProviderError> {
        let unknown = || ProviderError::UnknownFormat {
            path: path.to_path_buf(),
        };
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(unknown)?;

        let definition = self
            .definitions
            .iter()
            .find(|d| d.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .ok_or_else(unknown)?;
        debug!(provider = definition.name, ?path, "selected config format");
        Ok((definition.constructor)())
    }
}
