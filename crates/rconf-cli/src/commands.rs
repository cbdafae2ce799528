use std::io::Write;

use color_eyre::{eyre::bail, Result};
use rconf_core::Section;
use rconf_storage::{ConfigStore, StoreError};
use tracing::info;

use crate::cli::{Command, PasswordCommand};

/// Execute one subcommand against a loaded store, writing user output to `out`.
pub fn run(command: Command, store: &mut ConfigStore, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Listremotes => {
            for name in store.remotes().list_remotes() {
                writeln!(out, "{name}:")?;
            }
        }
        Command::Show { name: Some(name) } => {
            let section = store
                .remotes()
                .get_remote(&name)
                .ok_or_else(|| StoreError::RemoteNotFound(name.clone()))?;
            write_section(out, &name, section)?;
        }
        Command::Show { name: None } => {
            for (idx, (name, section)) in store.remotes().iter().enumerate() {
                if idx > 0 {
                    writeln!(out)?;
                }
                write_section(out, name, section)?;
            }
        }
        Command::Create {
            name,
            kind,
            options,
        } => {
            if store.remotes().has_remote(&name) {
                bail!("remote {name:?} already exists");
            }
            let section = store.remotes_mut().create_remote(name.as_str());
            section.set_string("type", kind);
            for (key, value) in options {
                section.set_string(key, value);
            }
            store.save()?;
            info!(remote = %name, "remote created");
        }
        Command::Update { name, options } => {
            let section = store
                .remotes_mut()
                .get_remote_mut(&name)
                .ok_or_else(|| StoreError::RemoteNotFound(name.clone()))?;
            for (key, value) in options {
                section.set_string(key, value);
            }
            store.save()?;
        }
        Command::Delete { name } => {
            if !store.remotes_mut().delete_remote(&name) {
                return Err(StoreError::RemoteNotFound(name).into());
            }
            store.save()?;
        }
        Command::Rename { old, new } => {
            if store.remotes().has_remote(&new) {
                bail!("remote {new:?} already exists");
            }
            if !store.remotes_mut().rename_remote(&old, &new) {
                return Err(StoreError::RemoteNotFound(old).into());
            }
            store.save()?;
        }
        Command::Copy {
            source,
            destination,
        } => {
            if !store.remotes_mut().copy_remote(&source, &destination) {
                return Err(StoreError::RemoteNotFound(source).into());
            }
            store.save()?;
        }
        Command::Password(PasswordCommand::Set) => {
            store.change_password()?;
            store.save()?;
            writeln!(out, "Config file {:?} is now encrypted", store.path())?;
        }
        Command::Password(PasswordCommand::Remove) => {
            store.clear_password();
            store.save()?;
            writeln!(out, "Config file {:?} is now stored unencrypted", store.path())?;
        }
        Command::Dump => {
            write!(out, "{}", store.to_plaintext()?)?;
        }
        Command::File => {
            let path = store.path();
            if path.exists() {
                writeln!(out, "Configuration file is stored at:\n{}", path.display())?;
            } else {
                writeln!(
                    out,
                    "Configuration file doesn't exist, but rconf will use this path:\n{}",
                    path.display()
                )?;
            }
        }
    }
    Ok(())
}

fn write_section(out: &mut impl Write, name: &str, section: &Section) -> std::io::Result<()> {
    writeln!(out, "[{name}]")?;
    for (key, value) in section.iter() {
        writeln!(out, "{key} = {value}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use rconf_core::ProviderRegistry;
    use rconf_storage::{
        key::{KeySettings, ScriptedPrompt},
        Keys, StoreOptions,
    };

    use super::*;

    fn open(path: &Path, keys: Keys) -> ConfigStore {
        ConfigStore::open(
            path,
            &ProviderRegistry::with_builtin(),
            keys,
            StoreOptions {
                low_level_retries: 0,
                max_backoff: Duration::ZERO,
            },
        )
        .expect("open")
    }

    fn run_to_string(command: Command, store: &mut ConfigStore) -> Result<String> {
        let mut out = Vec::new();
        run(command, store, &mut out)?;
        Ok(String::from_utf8(out).expect("utf8"))
    }

    #[test]
    fn create_list_and_show() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rclone.conf");
        let mut store = open(&path, Keys::none());

        run_to_string(
            Command::Create {
                name: "box".into(),
                kind: "s3".into(),
                options: vec![("region".into(), "eu".into())],
            },
            &mut store,
        )
        .expect("create");

        let mut reloaded = open(&path, Keys::none());
        let listed = run_to_string(Command::Listremotes, &mut reloaded).expect("list");
        assert_eq!(listed, "box:\n");
        let shown = run_to_string(
            Command::Show {
                name: Some("box".into()),
            },
            &mut reloaded,
        )
        .expect("show");
        assert_eq!(shown, "[box]\ntype = s3\nregion = eu\n");
    }

    #[test]
    fn create_refuses_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir.path().join("rclone.conf"), Keys::none());
        store.set_value("box", "type", "local");

        let err = run_to_string(
            Command::Create {
                name: "box".into(),
                kind: "s3".into(),
                options: vec![],
            },
            &mut store,
        )
        .expect_err("duplicate");
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn missing_remote_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir.path().join("rclone.conf"), Keys::none());
        let err = run_to_string(
            Command::Delete {
                name: "ghost".into(),
            },
            &mut store,
        )
        .expect_err("missing");
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::RemoteNotFound(name)) if name == "ghost"
        ));
    }

    #[test]
    fn rename_then_copy_persist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("remotes.json");
        let mut store = open(&path, Keys::none());
        store.set_value("a", "type", "local");

        run_to_string(
            Command::Rename {
                old: "a".into(),
                new: "b".into(),
            },
            &mut store,
        )
        .expect("rename");
        run_to_string(
            Command::Copy {
                source: "b".into(),
                destination: "c".into(),
            },
            &mut store,
        )
        .expect("copy");

        let reloaded = open(&path, Keys::none());
        assert_eq!(reloaded.remotes().list_remotes(), vec!["b", "c"]);
    }

    #[test]
    fn password_set_encrypts_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rclone.conf");
        let keys = Keys::new(
            KeySettings {
                ask_password: true,
                ..KeySettings::default()
            },
            Box::new(ScriptedPrompt::new(["pw", "pw"])),
        );
        let mut store = open(&path, keys);
        store.set_value("r", "type", "local");

        run_to_string(Command::Password(PasswordCommand::Set), &mut store).expect("set");
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains(rconf_storage::codec::SENTINEL));

        let dumped = run_to_string(Command::Dump, &mut store).expect("dump");
        assert_eq!(dumped, "[r]\ntype = local\n");
    }
}
