//! JSON format: a top-level object of remotes, each an object of string options.

use serde_json::{Map, Value};

use crate::{
    provider::{Provider, ProviderDefinition, ProviderError, ProviderRegistry},
    remote::RemoteConfig,
};

pub const EXTENSIONS: &[&str] = &["json"];

pub fn register(registry: &mut ProviderRegistry) {
    registry.register(ProviderDefinition {
        name: "json",
        extensions: EXTENSIONS,
        constructor: new_provider,
    });
}

fn new_provider() -> Box<dyn Provider> {
    Box::new(JsonProvider)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonProvider;

impl Provider for JsonProvider {
    fn name(&self) -> &'static str {
        "json"
    }

    fn load(&self, plaintext: &[u8]) -> Result<RemoteConfig, ProviderError> {
        if plaintext.iter().all(u8::is_ascii_whitespace) {
            return Ok(RemoteConfig::new());
        }
        let root: Map<String, Value> =
            serde_json::from_slice(plaintext).map_err(|e| ProviderError::Parse {
                line: e.line(),
                reason: e.to_string(),
            })?;

        let mut config = RemoteConfig::new();
        for (remote, options) in root {
            let Value::Object(options) = options else {
                return Err(ProviderError::InvalidValue {
                    remote,
                    key: String::new(),
                    reason: "remote must be an object".to_string(),
                });
            };
            let section = config.create_remote(remote.as_str());
            for (key, value) in options {
                let value = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => {
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
        let root: Map<String, Value> = config
            .iter()
            .map(|(name, section)| {
                let options: Map<String, Value> = section
                    .iter()
                    .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                    .collect();
                (name.to_string(), Value::Object(options))
            })
            .collect();

        let mut out = serde_json::to_vec_pretty(&root).map_err(|e| ProviderError::Serialize {
            reason: e.to_string(),
        })?;
        out.push(b'\n');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_keeps_order() {
        let mut cfg = RemoteConfig::new();
        cfg.create_remote("zeta").set_string("type", "local");
        let alpha = cfg.create_remote("alpha");
        alpha.set_string("type", "s3");
        alpha.set_string("acl", "private");

        let bytes = JsonProvider.save(&cfg).expect("save");
        let back = JsonProvider.load(&bytes).expect("load");
        assert_eq!(back, cfg);
        assert_eq!(back.list_remotes(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn scalars_become_strings() {
        let text = br#"{"r": {"port": 22, "insecure": true}}"#;
        let cfg = JsonProvider.load(text).expect("load");
        let r = cfg.get_remote("r").expect("r");
        assert_eq!(r.get_string("port"), Some("22"));
        assert_eq!(r.get_string("insecure"), Some("true"));
    }

    #[test]
    fn rejects_nested_values() {
        let text = br#"{"r": {"nested": {"a": "b"}}}"#;
        let err = JsonProvider.load(text).expect_err("should fail");
        assert!(matches!(err, ProviderError::InvalidValue { ref key, .. } if key == "nested"));
    }

    #[test]
    fn blank_input_is_empty_config() {
        assert!(JsonProvider.load(b"  \n").expect("load").is_empty());
    }
}
