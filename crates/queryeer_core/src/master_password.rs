use crate::DbError;
use secrecy::SecretString;

const KEYRING_SERVICE: &str = "queryeer";
const KEYRING_ACCOUNT: &str = "master-password";

/// Where the master password is remembered between runs.
pub trait MasterPasswordStore: Send + Sync {
    /// Whether [`remember`](Self::remember) survives the process.
    fn is_persistent(&self) -> bool;

    fn recall(&self) -> Result<Option<SecretString>, DbError>;

    fn remember(&self, password: &str) -> Result<(), DbError>;

    fn forget(&self) -> Result<(), DbError>;
}

/// Remembers nothing. Used when no OS keyring is reachable.
pub struct EphemeralMasterPassword;

impl MasterPasswordStore for EphemeralMasterPassword {
    fn is_persistent(&self) -> bool {
        false
    }

    fn recall(&self) -> Result<Option<SecretString>, DbError> {
        Ok(None)
    }

    fn remember(&self, _password: &str) -> Result<(), DbError> {
        log::debug!("No keyring, master password not remembered");
        Ok(())
    }

    fn forget(&self) -> Result<(), DbError> {
        Ok(())
    }
}

/// Master password kept in the OS keyring under a single fixed entry.
pub struct KeyringMasterPassword {
    entry: keyring::Entry,
}

impl KeyringMasterPassword {
    /// Opens the keyring entry. `None` when no keyring backend answers.
    pub fn open() -> Option<Self> {
        let entry = match keyring::Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT) {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("Keyring entry unavailable: {}", e);
                return None;
            }
        };

        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Some(Self { entry }),
            Err(e) => {
                log::debug!("Keyring not usable: {}", e);
                None
            }
        }
    }
}

impl MasterPasswordStore for KeyringMasterPassword {
    fn is_persistent(&self) -> bool {
        true
    }

    fn recall(&self) -> Result<Option<SecretString>, DbError> {
        match self.entry.get_password() {
            Ok(password) => Ok(Some(SecretString::from(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keyring_error(e)),
        }
    }

    fn remember(&self, password: &str) -> Result<(), DbError> {
        self.entry.set_password(password).map_err(keyring_error)
    }

    fn forget(&self) -> Result<(), DbError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_error(e)),
        }
    }
}

fn keyring_error(e: keyring::Error) -> DbError {
    DbError::IoError(std::io::Error::other(e.to_string()))
}

/// The keyring store when a keyring is reachable, otherwise one that
/// remembers nothing.
pub fn master_password_store() -> Box<dyn MasterPasswordStore> {
    match KeyringMasterPassword::open() {
        Some(store) => Box::new(store),
        None => {
            log::warn!("OS keyring unavailable, master password will not be remembered");
            Box::new(EphemeralMasterPassword)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_store_forgets_immediately() {
        let store = EphemeralMasterPassword;

        store.remember("hunter2").unwrap();

        assert!(!store.is_persistent());
        assert!(store.recall().unwrap().is_none());
        store.forget().unwrap();
    }
}
