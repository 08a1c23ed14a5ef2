use crate::{AuthType, ConnectionProfile, CryptoService};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Username and decrypted password for one profile. Memory only.
pub struct ResolvedCredential {
    pub username: String,
    password: SecretString,
}

impl ResolvedCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Interactive source of credentials (a dialog, a terminal prompt).
///
/// Returns `None` when the user cancels.
pub trait CredentialPrompt: Send + Sync {
    fn prompt(&self, profile: &ConnectionProfile, username: &str) -> Option<ResolvedCredential>;
}

/// Prompt that always cancels. Used where no user is around to answer.
pub struct NoPrompt;

impl CredentialPrompt for NoPrompt {
    fn prompt(&self, _profile: &ConnectionProfile, _username: &str) -> Option<ResolvedCredential> {
        None
    }
}

/// Turns stored (encrypted) or prompted secrets into session credentials.
pub struct CredentialResolver {
    crypto: Arc<CryptoService>,
    prompt: Arc<dyn CredentialPrompt>,
    resolved: Mutex<HashMap<Uuid, Arc<ResolvedCredential>>>,
}

impl CredentialResolver {
    pub fn new(crypto: Arc<CryptoService>, prompt: Arc<dyn CredentialPrompt>) -> Self {
        Self {
            crypto,
            prompt,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Makes sure `profile` has usable credentials.
    ///
    /// A `silent` call never prompts; it is what background loads use.
    pub fn prepare(&self, profile: &ConnectionProfile, silent: bool) -> bool {
        if profile.auth == AuthType::None {
            return true;
        }

        if self.resolved().contains_key(&profile.id) {
            return true;
        }

        if let Some(sealed) = profile.encrypted_password.as_deref()
            && profile.has_stored_password()
        {
            if !self.crypto.is_initialized() {
                if silent {
                    log::debug!(
                        "Skipping silent prepare of '{}': crypto service locked",
                        profile.name
                    );
                    return false;
                }
            } else {
                return match self.crypto.decrypt(sealed) {
                    Some(password) => {
                        self.store(profile, ResolvedCredential::new(&profile.username, password));
                        true
                    }
                    None => {
                        log::warn!("Could not decrypt stored password of '{}'", profile.name);
                        self.invalidate(profile.id);
                        false
                    }
                };
            }
        }

        if silent {
            return false;
        }

        match self.prompt.prompt(profile, &profile.username) {
            Some(credential) => {
                self.store(profile, credential);
                true
            }
            None => {
                log::info!("Credential prompt for '{}' cancelled", profile.name);
                false
            }
        }
    }

    pub fn credential(&self, profile_id: Uuid) -> Option<Arc<ResolvedCredential>> {
        self.resolved().get(&profile_id).cloned()
    }

    pub fn is_resolved(&self, profile_id: Uuid) -> bool {
        self.resolved().contains_key(&profile_id)
    }

    /// Drops the cached credential, e.g. after the server rejected it.
    pub fn invalidate(&self, profile_id: Uuid) {
        self.resolved().remove(&profile_id);
    }

    pub fn clear_all(&self) {
        self.resolved().clear();
    }

    fn store(&self, profile: &ConnectionProfile, credential: ResolvedCredential) {
        log::debug!("Resolved credentials for '{}'", profile.name);
        self.resolved().insert(profile.id, Arc::new(credential));
    }

    fn resolved(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<ResolvedCredential>>> {
        match self.resolved.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                log::warn!("Credential cache mutex poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SALT: &[u8] = b"resolver-test-salt";

    struct ScriptedPrompt {
        answer: Option<(String, String)>,
        calls: AtomicUsize,
    }

    impl ScriptedPrompt {
        fn answering(user: &str, password: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Some((user.to_string(), password.to_string())),
                calls: AtomicUsize::new(0),
            })
        }

        fn cancelling() -> Arc<Self> {
            Arc::new(Self {
                answer: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CredentialPrompt for ScriptedPrompt {
        fn prompt(&self, _profile: &ConnectionProfile, _username: &str) -> Option<ResolvedCredential> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .as_ref()
                .map(|(u, p)| ResolvedCredential::new(u, p))
        }
    }

    fn unlocked_crypto() -> Arc<CryptoService> {
        let crypto = Arc::new(CryptoService::new());
        crypto.initialize("master", SALT).unwrap();
        crypto
    }

    fn basic_profile() -> ConnectionProfile {
        ConnectionProfile::new("es", DbKind::Elasticsearch, "http://es:9200")
            .with_basic_auth("elastic")
    }

    #[test]
    fn no_auth_always_succeeds() {
        let prompt = ScriptedPrompt::cancelling();
        let resolver = CredentialResolver::new(Arc::new(CryptoService::new()), prompt.clone());
        let profile = ConnectionProfile::new("local", DbKind::Sqlite, "/tmp/x.db");

        assert!(resolver.prepare(&profile, true));
        assert!(resolver.prepare(&profile, false));
        assert_eq!(prompt.calls(), 0);
    }

    #[test]
    fn silent_with_blank_password_fails_without_prompting() {
        let prompt = ScriptedPrompt::answering("elastic", "pw");
        let resolver = CredentialResolver::new(unlocked_crypto(), prompt.clone());
        let mut profile = basic_profile();
        profile.encrypted_password = Some(String::new());

        assert!(!resolver.prepare(&profile, true));
        assert_eq!(prompt.calls(), 0);
        assert!(!resolver.is_resolved(profile.id));
    }

    #[test]
    fn decrypts_stored_password() {
        let crypto = unlocked_crypto();
        let prompt = ScriptedPrompt::cancelling();
        let resolver = CredentialResolver::new(crypto.clone(), prompt.clone());

        let mut profile = basic_profile();
        profile.encrypted_password = Some(crypto.encrypt("changeme").unwrap());

        assert!(resolver.prepare(&profile, true));
        let credential = resolver.credential(profile.id).unwrap();
        assert_eq!(credential.username, "elastic");
        assert_eq!(credential.password(), "changeme");
        assert_eq!(prompt.calls(), 0);
    }

    #[test]
    fn silent_short_circuits_when_crypto_locked() {
        let sealed = unlocked_crypto().encrypt("changeme").unwrap();
        let prompt = ScriptedPrompt::answering("elastic", "typed");
        let resolver = CredentialResolver::new(Arc::new(CryptoService::new()), prompt.clone());

        let mut profile = basic_profile();
        profile.encrypted_password = Some(sealed);

        assert!(!resolver.prepare(&profile, true));
        assert_eq!(prompt.calls(), 0);

        assert!(resolver.prepare(&profile, false));
        assert_eq!(prompt.calls(), 1);
        assert_eq!(resolver.credential(profile.id).unwrap().password(), "typed");
    }

    #[test]
    fn decryption_failure_fails_and_clears() {
        let foreign = {
            let other = Arc::new(CryptoService::new());
            other.initialize("someone-else", SALT).unwrap();
            other.encrypt("changeme").unwrap()
        };
        let prompt = ScriptedPrompt::answering("elastic", "typed");
        let resolver = CredentialResolver::new(unlocked_crypto(), prompt.clone());

        let mut profile = basic_profile();
        profile.encrypted_password = Some(foreign);

        assert!(!resolver.prepare(&profile, false));
        assert!(!resolver.is_resolved(profile.id));
        assert_eq!(prompt.calls(), 0);
    }

    #[test]
    fn cancelled_prompt_fails_and_keeps_stored_password() {
        let prompt = ScriptedPrompt::cancelling();
        let resolver = CredentialResolver::new(Arc::new(CryptoService::new()), prompt.clone());

        let mut profile = basic_profile();
        profile.encrypted_password = Some("sealed-value".to_string());
        let before = profile.clone();

        assert!(!resolver.prepare(&profile, false));
        assert_eq!(prompt.calls(), 1);
        assert_eq!(profile, before);
    }

    #[test]
    fn cached_credential_short_circuits_and_invalidate_clears() {
        let prompt = ScriptedPrompt::answering("elastic", "typed");
        let resolver = CredentialResolver::new(unlocked_crypto(), prompt.clone());
        let profile = basic_profile();

        assert!(!resolver.prepare(&profile, true));
        assert!(resolver.prepare(&profile, false));
        assert!(resolver.prepare(&profile, true));
        assert_eq!(prompt.calls(), 1);

        resolver.invalidate(profile.id);
        assert!(!resolver.prepare(&profile, true));
    }

    #[test]
    fn debug_redacts_password() {
        let credential = ResolvedCredential::new("u", "hunter2");
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("hunter2"));
    }
}
