//! INI-style format used by `rclone.conf`:
//!
//! ```text
//! [remote]
//! type = s3
//! region = eu-west-1
//! ```
//!
//! Values with surrounding whitespace, line breaks or a leading quote are written
//! double-quoted with backslash escapes so every string survives a round trip.

use std::fmt::Write as _;

use crate::{
    provider::{Provider, ProviderDefinition, ProviderError, ProviderRegistry},
    remote::RemoteConfig,
};

pub const EXTENSIONS: &[&str] = &["conf", "ini"];

pub fn register(registry: &mut ProviderRegistry) {
    registry.register(ProviderDefinition {
        name: "ini",
        extensions: EXTENSIONS,
        constructor: new_provider,
    });
}

fn new_provider() -> Box<dyn Provider> {
    Box::new(IniProvider)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IniProvider;

impl Provider for IniProvider {
    fn name(&self) -> &'static str {
        "ini"
    }

    fn load(&self, plaintext: &[u8]) -> Result<RemoteConfig, ProviderError> {
        let text = std::str::from_utf8(plaintext).map_err(|e| ProviderError::Parse {
            line: 0,
            reason: format!("not valid UTF-8: {e}"),
        })?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut config = RemoteConfig::new();
        let mut current: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| ProviderError::Parse {
                    line: line_no,
                    reason: "unterminated section header".to_string(),
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(ProviderError::Parse {
                        line: line_no,
                        reason: "empty section name".to_string(),
                    });
                }
                config.create_remote(name);
                current = Some(name.to_string());
                continue;
            }

            let Some(remote) = current.as_deref() else {
                return Err(ProviderError::Parse {
                    line: line_no,
                    reason: "option outside of any section".to_string(),
                });
            };
            let (key, value) = line.split_once('=').ok_or_else(|| ProviderError::Parse {
                line: line_no,
                reason: "expected `key = value`".to_string(),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ProviderError::Parse {
                    line: line_no,
                    reason: "empty option name".to_string(),
                });
            }
            let value = unquote(value.trim()).map_err(|reason| ProviderError::Parse {
                line: line_no,
                reason,
            })?;
            config.create_remote(remote).set_string(key, value);
        }

        Ok(config)
    }

    fn save(&self, config: &RemoteConfig) -> Result<Vec<u8>, ProviderError> {
        let mut out = String::new();
        for (idx, (name, section)) in config.iter().enumerate() {
            check_section_name(name)?;
            if idx > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{name}]");
            for (key, value) in section.iter() {
                check_key(key)?;
                let _ = writeln!(out, "{key} = {}", quote(value));
            }
        }
        Ok(out.into_bytes())
    }
}

fn check_section_name(name: &str) -> Result<(), ProviderError> {
    let reason = if name.is_empty() {
        Some("empty")
    } else if name.trim() != name {
        Some("surrounding whitespace")
    } else if name.contains([']', '\n', '\r']) {
        Some("contains `]` or a line break")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ProviderError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn check_key(key: &str) -> Result<(), ProviderError> {
    let reason = if key.is_empty() {
        Some("empty")
    } else if key.trim() != key {
        Some("surrounding whitespace")
    } else if key.contains(['=', '\n', '\r']) {
        Some("contains `=` or a line break")
    } else if key.starts_with(['[', ';', '#']) {
        Some("starts with `[`, `;` or `#`")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ProviderError::InvalidName {
            name: key.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn needs_quotes(value: &str) -> bool {
    value.trim() != value || value.contains(['\n', '\r']) || value.starts_with('"')
}

fn quote(value: &str) -> String {
    if !needs_quotes(value) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn unquote(raw: &str) -> Result<String, String> {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return Ok(raw.to_string());
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => return Err(format!("unknown escape `\\{other}`")),
            None => return Err("dangling escape at end of value".to_string()),
        }
    }
    Ok(out)
}
