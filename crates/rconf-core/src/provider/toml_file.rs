//! TOML format: one table per remote.

use toml::{Table, Value};

use crate::{
    provider::{Provider, ProviderDefinition, ProviderError, ProviderRegistry},
    remote::RemoteConfig,
};

pub const EXTENSIONS: &[&str] = &["toml"];

pub fn register(registry: &mut ProviderRegistry) {
    registry.register(ProviderDefinition {
        name: "toml",
        extensions: EXTENSIONS,
        constructor: new_provider,
    });
}

fn new_provider() -> Box<dyn Provider> {
    Box::new(TomlProvider)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TomlProvider;

impl Provider for TomlProvider {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn load(&self, plaintext: &[u8]) -> Result<RemoteConfig, ProviderError> {
        let text = std::str::from_utf8(plaintext).map_err(|e| ProviderError::Parse {
            line: 0,
            reason: format!("not valid UTF-8: {e}"),
        })?;
        let root: Table = toml::from_str(text).map_err(|e| ProviderError::Parse {
            line: e
                .span()
                .and_then(|span| text.get(..span.start))
                .map(|before| before.matches('\n').count() + 1)
                .unwrap_or(0),
            reason: e.message().to_string(),
        })?;

        let mut config = RemoteConfig::new();
        for (remote, options) in root {
            let Value::Table(options) = options else {
                return Err(ProviderError::InvalidValue {
                    remote,
                    key: String::new(),
                    reason: "remote must be a table".to_string(),
                });
            };
            let section = config.create_remote(remote.as_str());
            for (key, value) in options {
                let value = match value {
                    Value::String(s) => s,
                    Value::Integer(i) => i.to_string(),
                    Value::Float(f) => f.to_string(),
                    Value::Boolean(b) => b.to_string(),
                    Value::Datetime(d) => d.to_string(),
                    Value::Array(_) | Value::Table(_) => {
                        return Err(ProviderError::InvalidValue {
                            remote,
                            key,
                            reason: "only scalar values are supported".to_string(),
                        })
                    }
                };
                section.set_string(key, value);
            }
        }
        Ok(config)
    }

    fn save(&self, config: &RemoteConfig) -> Result<Vec<u8>, ProviderError> {
        let root: Table = config
            .iter()
            .map(|(name, section)| {
                let options: Table = section
                    .iter()
                    .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                    .collect();
                (name.to_string(), Value::Table(options))
            })
            .collect();

        toml::to_string(&root)
            .map(String::into_bytes)
            .map_err(|e| ProviderError::Serialize {
                reason: e.to_string(),
            })
    }
}
