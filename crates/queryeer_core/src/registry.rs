use crate::{ConnectionProfile, CryptoService, DbError, ProfileStore};
use log::{error, info, warn};
use uuid::Uuid;

/// Named connection profiles, backed by a `ProfileStore`.
///
/// Every commit (add, update, remove, password change) is written through
/// to disk immediately. A commit whose save fails is rolled back, so memory
/// and disk never disagree.
pub struct ConnectionRegistry {
    profiles: Vec<ConnectionProfile>,
    store: Option<ProfileStore>,
}

impl ConnectionRegistry {
    pub fn load(mut store: ProfileStore) -> Self {
        let profiles = store.load();
        info!("Loaded {} profiles from {}", profiles.len(), store.dir().display());

        Self {
            profiles,
            store: Some(store),
        }
    }

    /// Registry without persistence.
    pub fn in_memory(profiles: Vec<ConnectionProfile>) -> Self {
        Self {
            profiles,
            store: None,
        }
    }

    pub fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    pub fn enabled_profiles(&self) -> impl Iterator<Item = &ConnectionProfile> {
        self.profiles.iter().filter(|p| p.enabled)
    }

    pub fn find(&self, id: Uuid) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn add(&mut self, profile: ConnectionProfile) -> Result<(), DbError> {
        if profile.name.trim().is_empty() {
            return Err(DbError::InvalidProfile("Name is required".to_string()));
        }

        if self.find_by_name(&profile.name).is_some() {
            return Err(DbError::InvalidProfile(format!(
                "A connection named '{}' already exists",
                profile.name
            )));
        }

        let previous = self.profiles.clone();
        self.profiles.push(profile);
        self.commit(previous)
    }

    pub fn update(&mut self, profile: ConnectionProfile) -> Result<(), DbError> {
        if self
            .profiles
            .iter()
            .any(|p| p.id != profile.id && p.name == profile.name)
        {
            return Err(DbError::InvalidProfile(format!(
                "A connection named '{}' already exists",
                profile.name
            )));
        }

        let previous = self.profiles.clone();
        let existing = self
            .profiles
            .iter_mut()
            .find(|p| p.id == profile.id)
            .ok_or_else(|| DbError::ProfileNotFound(profile.id.to_string()))?;

        *existing = profile;
        self.commit(previous)
    }

    pub fn remove(&mut self, id: Uuid) -> Result<ConnectionProfile, DbError> {
        let idx = self
            .profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| DbError::ProfileNotFound(id.to_string()))?;

        let previous = self.profiles.clone();
        let removed = self.profiles.remove(idx);
        self.commit(previous)?;
        Ok(removed)
    }

    /// Encrypts `password` and stores it on the profile.
    pub fn set_password(
        &mut self,
        id: Uuid,
        password: &str,
        crypto: &CryptoService,
    ) -> Result<(), DbError> {
        let sealed = crypto.encrypt(password)?;

        let previous = self.profiles.clone();
        let profile = self
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DbError::ProfileNotFound(id.to_string()))?;

        profile.encrypted_password = Some(sealed);
        self.commit(previous)
    }

    pub fn clear_password(&mut self, id: Uuid) -> Result<(), DbError> {
        let previous = self.profiles.clone();
        let profile = self
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DbError::ProfileNotFound(id.to_string()))?;

        profile.encrypted_password = None;
        self.commit(previous)
    }

    fn commit(&mut self, previous: Vec<ConnectionProfile>) -> Result<(), DbError> {
        if let Err(e) = self.save() {
            warn!("Rolling back profile change after failed save");
            self.profiles = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), DbError> {
        let Some(ref store) = self.store else {
            return Ok(());
        };

        match store.save(&self.profiles) {
            Ok(()) => {
                info!("Saved {} profiles to disk", self.profiles.len());
                Ok(())
            }
            Err(e) => {
                error!("Failed to save profiles: {:?}", e);
                Err(e)
            }
        }
    }
}
