use std::io;

use dialoguer::{theme::ColorfulTheme, Password};
use rconf_storage::{KeyError, PasswordPrompt};

/// Hidden-input password prompt on the controlling terminal (written to stderr).
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn ask(&mut self, prompt: &str) -> Result<Option<String>, KeyError> {
        let answer = Password::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact();
        match answer {
            Ok(password) => Ok(Some(password)),
            Err(dialoguer::Error::IO(err))
                if matches!(
                    err.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(KeyError::Prompt(err.to_string())),
        }
    }
}
