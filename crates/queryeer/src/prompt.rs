use dialoguer::{Input, Password};
use queryeer_core::{ConnectionProfile, CredentialPrompt, ResolvedCredential};

/// Asks for credentials on the terminal.
pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn prompt(&self, profile: &ConnectionProfile, username: &str) -> Option<ResolvedCredential> {
        eprintln!("Credentials for {} ({})", profile.name, profile.endpoint);

        let username: String = match Input::new()
            .with_prompt("User")
            .with_initial_text(username)
            .interact_text()
        {
            Ok(username) => username,
            Err(e) => {
                log::debug!("User prompt aborted: {}", e);
                return None;
            }
        };

        match Password::new().with_prompt("Password").interact() {
            Ok(password) => Some(ResolvedCredential::new(username, password)),
            Err(e) => {
                log::debug!("Password prompt aborted: {}", e);
                None
            }
        }
    }
}

pub fn read_secret(prompt: &str, confirm: bool) -> Option<String> {
    let mut input = Password::new().with_prompt(prompt);
    if confirm {
        input = input.with_confirmation("Repeat", "Entries do not match");
    }

    input.interact().ok()
}
