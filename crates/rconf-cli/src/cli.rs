use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "rconf",
    about = "Manage rclone-style remote configuration, optionally encrypted",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Config file to use (extension selects the format: .conf, .ini, .json, .toml).
    #[arg(long, global = true, env = "RCLONE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Extra attempts when saving the config file fails.
    #[arg(long, global = true, env = "RCLONE_LOW_LEVEL_RETRIES")]
    pub low_level_retries: Option<u32>,

    /// Never prompt for the configuration password.
    #[arg(long, global = true)]
    pub no_ask_password: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List configured remotes.
    Listremotes,
    /// Print one remote, or all of them.
    Show { name: Option<String> },
    /// Create a new remote of the given type with optional `key=value` options.
    Create {
        name: String,
        #[arg(value_name = "TYPE")]
        kind: String,
        #[arg(value_parser = parse_option)]
        options: Vec<(String, String)>,
    },
    /// Set `key=value` options on an existing remote.
    Update {
        name: String,
        #[arg(value_parser = parse_option, required = true)]
        options: Vec<(String, String)>,
    },
    /// Delete a remote.
    Delete { name: String },
    /// Rename a remote.
    Rename { old: String, new: String },
    /// Copy a remote's options to another name.
    Copy { source: String, destination: String },
    /// Manage config file encryption.
    #[command(subcommand)]
    Password(PasswordCommand),
    /// Print the decrypted config file.
    Dump,
    /// Show the config file location.
    File,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum PasswordCommand {
    /// Encrypt the config file with a new password (prompts twice).
    Set,
    /// Store the config file unencrypted.
    Remove,
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}
