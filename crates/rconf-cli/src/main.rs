mod cli;
mod commands;
mod prompt;
mod settings;

use std::io;

use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use rconf_core::ProviderRegistry;
use rconf_storage::{ConfigStore, Keys};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::prompt::TerminalPrompt;

/// Entry point: resolve settings, load the config file, run one command.
fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let settings = settings::resolve(&cli)?;
    debug!(?settings, "resolved settings");

    let keys = Keys::new(settings.keys, Box::new(TerminalPrompt));
    let mut store = ConfigStore::open(
        &settings.config_path,
        &ProviderRegistry::with_builtin(),
        keys,
        settings.store,
    )
    .wrap_err_with(|| format!("failed to load config file {:?}", settings.config_path))?;

    commands::run(cli.command, &mut store, &mut io::stdout().lock())
}

fn init_tracing() {
    // Respect user-provided filters, default to info; logs go to stderr so
    // command output stays pipeable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
