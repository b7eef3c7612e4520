//! Credentials and interactive authentication prompts
//!
//! A [`Credential`] supplies the identity used during the blocking
//! authentication phase; a [`PromptHandler`] answers keyboard-interactive
//! challenges (2FA/TOTP style) on the connection thread. The worker only
//! borrows both for the duration of authentication and channel setup.

use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::error::EngineError;

/// Authentication material exposed by a credential.
///
/// Borrowed views only - the secret bytes stay owned (and zeroized) by the
/// credential itself.
pub enum AuthSecret<'a> {
    /// Password authentication
    Password(&'a str),

    /// Private key file on disk, with optional passphrase
    PrivateKeyFile {
        path: &'a Path,
        passphrase: Option<&'a str>,
    },

    /// Keyboard-interactive authentication; challenges are answered by the
    /// worker's [`PromptHandler`].
    KeyboardInteractive,
}

/// An identity plus the capability to authenticate as it.
pub trait Credential: Send + Sync {
    /// Login name presented to the server.
    fn username(&self) -> &str;

    /// The material the engine should authenticate with.
    fn secret(&self) -> AuthSecret<'_>;
}

/// Password credential. The password is zeroized on drop.
pub struct PasswordCredential {
    username: String,
    password: Zeroizing<String>,
}

impl PasswordCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl Credential for PasswordCredential {
    fn username(&self) -> &str {
        &self.username
    }

    fn secret(&self) -> AuthSecret<'_> {
        AuthSecret::Password(&self.password)
    }
}

/// Private-key-file credential, with optional (zeroized) passphrase.
pub struct KeyFileCredential {
    username: String,
    key_path: PathBuf,
    passphrase: Option<Zeroizing<String>>,
}

impl KeyFileCredential {
    pub fn new(
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            username: username.into(),
            key_path: key_path.into(),
            passphrase: passphrase.map(Zeroizing::new),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

impl Credential for KeyFileCredential {
    fn username(&self) -> &str {
        &self.username
    }

    fn secret(&self) -> AuthSecret<'_> {
        AuthSecret::PrivateKeyFile {
            path: &self.key_path,
            passphrase: self.passphrase.as_deref().map(String::as_str),
        }
    }
}

/// Identity-only credential for keyboard-interactive authentication.
pub struct InteractiveCredential {
    username: String,
}

impl InteractiveCredential {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

impl Credential for InteractiveCredential {
    fn username(&self) -> &str {
        &self.username
    }

    fn secret(&self) -> AuthSecret<'_> {
        AuthSecret::KeyboardInteractive
    }
}

/// A single keyboard-interactive challenge.
#[derive(Debug, Clone)]
pub struct Prompt {
    /// The prompt text to display
    pub text: String,
    /// true = show input (echo), false = mask input (password-style)
    pub echo: bool,
}

/// Answers keyboard-interactive challenges.
///
/// Called on the connection thread during the blocking authentication
/// phase; implementations must not block for any significant amount of
/// time beyond gathering the user's response.
pub trait PromptHandler: Send {
    /// Return one response per prompt, in prompt order.
    fn respond(
        &mut self,
        name: &str,
        instruction: &str,
        prompts: &[Prompt],
    ) -> Result<Vec<String>, EngineError>;
}

/// Prompt handler that answers every challenge with an empty string.
///
/// Suitable for one-shot command workers and tests where the server is not
/// expected to issue interactive challenges.
pub struct NoPrompts;

impl PromptHandler for NoPrompts {
    fn respond(
        &mut self,
        _name: &str,
        _instruction: &str,
        prompts: &[Prompt],
    ) -> Result<Vec<String>, EngineError> {
        Ok(vec![String::new(); prompts.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_credential_exposes_secret() {
        let cred = PasswordCredential::new("admin", "hunter2");
        assert_eq!(cred.username(), "admin");
        match cred.secret() {
            AuthSecret::Password(p) => assert_eq!(p, "hunter2"),
            _ => panic!("expected password secret"),
        }
    }

    #[test]
    fn key_file_credential_with_passphrase() {
        let cred = KeyFileCredential::new("deploy", "/home/deploy/.ssh/id_ed25519", Some("pw".into()));
        match cred.secret() {
            AuthSecret::PrivateKeyFile { path, passphrase } => {
                assert_eq!(path, Path::new("/home/deploy/.ssh/id_ed25519"));
                assert_eq!(passphrase, Some("pw"));
            }
            _ => panic!("expected key file secret"),
        }
    }

    #[test]
    fn key_file_credential_accepts_on_disk_key() {
        let key_file = tempfile::NamedTempFile::new().expect("temp key file");
        let cred = KeyFileCredential::new("deploy", key_file.path(), None);
        match cred.secret() {
            AuthSecret::PrivateKeyFile { path, passphrase } => {
                assert!(path.exists());
                assert!(passphrase.is_none());
            }
            _ => panic!("expected key file secret"),
        }
    }

    #[test]
    fn no_prompts_answers_every_challenge() {
        let prompts = vec![
            Prompt {
                text: "Password:".into(),
                echo: false,
            },
            Prompt {
                text: "Code:".into(),
                echo: true,
            },
        ];
        let answers = NoPrompts.respond("", "", &prompts).expect("responses");
        assert_eq!(answers, vec![String::new(), String::new()]);
    }
}
