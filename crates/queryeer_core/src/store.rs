use crate::{ConnectionProfile, DbError, DbKind};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Persists connection profiles as one JSON document per catalog type.
///
/// A document that cannot be read or parsed is skipped on load and then left
/// untouched by every later save, so one broken file never costs the
/// profiles of the other kinds.
pub struct ProfileStore {
    dir: PathBuf,
    unreadable: HashSet<DbKind>,
}

impl ProfileStore {
    pub fn new() -> Result<Self, DbError> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            DbError::IoError(std::io::Error::other("Could not find config directory"))
        })?;

        Self::with_dir(config_dir.join("queryeer").join("connections"))
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self, DbError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(DbError::IoError)?;
        Ok(Self {
            dir,
            unreadable: HashSet::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: DbKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.file_stem()))
    }

    /// Kinds whose document failed to load. Saves skip them.
    pub fn unreadable_kinds(&self) -> &HashSet<DbKind> {
        &self.unreadable
    }

    pub fn load(&mut self) -> Vec<ConnectionProfile> {
        let mut profiles = Vec::new();
        self.unreadable.clear();

        for kind in DbKind::ALL {
            let path = self.path_for(*kind);
            if !path.exists() {
                continue;
            }

            match Self::read_document(&path) {
                Ok(loaded) => {
                    for profile in loaded {
                        if profile.kind != *kind {
                            log::warn!(
                                "Profile '{}' of kind {:?} found in {}, keeping it",
                                profile.name,
                                profile.kind,
                                path.display()
                            );
                        }
                        profiles.push(profile);
                    }
                }
                Err(e) => {
                    log::error!(
                        "Skipping {}: {}. The file is left as is until it is repaired",
                        path.display(),
                        e
                    );
                    self.unreadable.insert(*kind);
                }
            }
        }

        profiles
    }

    pub fn save(&self, profiles: &[ConnectionProfile]) -> Result<(), DbError> {
        let blocked = DbKind::ALL.iter().find(|kind| {
            self.unreadable.contains(*kind) && profiles.iter().any(|p| p.kind == **kind)
        });

        if let Some(kind) = blocked {
            return Err(DbError::InvalidProfile(format!(
                "{} could not be read; repair or remove it before saving {} connections",
                self.path_for(*kind).display(),
                kind.display_name()
            )));
        }

        for kind in DbKind::ALL {
            if self.unreadable.contains(kind) {
                continue;
            }

            let path = self.path_for(*kind);
            let of_kind: Vec<&ConnectionProfile> =
                profiles.iter().filter(|p| p.kind == *kind).collect();

            if of_kind.is_empty() {
                if path.exists() {
                    fs::remove_file(&path).map_err(DbError::IoError)?;
                }
                continue;
            }

            let content = serde_json::to_string_pretty(&of_kind)
                .map_err(|e| DbError::InvalidProfile(e.to_string()))?;

            fs::write(&path, content).map_err(DbError::IoError)?;
        }

        Ok(())
    }

    fn read_document(path: &Path) -> Result<Vec<ConnectionProfile>, DbError> {
        let content = fs::read_to_string(path).map_err(DbError::IoError)?;
        serde_json::from_str(&content).map_err(|e| DbError::InvalidProfile(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthType;

    fn temp_store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::with_dir(dir.path().join("connections")).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_directory_contents_load_empty() {
        let (_dir, mut store) = temp_store();
        assert!(store.load().is_empty());
        assert!(store.unreadable_kinds().is_empty());
    }

    #[test]
    fn writes_one_document_per_kind() {
        let (_dir, mut store) = temp_store();

        let sqlite = ConnectionProfile::new("local", DbKind::Sqlite, "/tmp/local.db");
        let es = ConnectionProfile::new("logs", DbKind::Elasticsearch, "http://es:9200")
            .with_basic_auth("elastic");

        store.save(&[sqlite.clone(), es.clone()]).unwrap();

        assert!(store.path_for(DbKind::Sqlite).exists());
        assert!(store.path_for(DbKind::Elasticsearch).exists());
        assert!(!store.path_for(DbKind::Postgres).exists());

        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        let es_loaded = loaded.iter().find(|p| p.id == es.id).unwrap();
        assert_eq!(es_loaded.auth, AuthType::Basic);
        assert_eq!(es_loaded.username, "elastic");
    }

    #[test]
    fn removes_documents_of_emptied_kinds() {
        let (_dir, store) = temp_store();
        let sqlite = ConnectionProfile::new("local", DbKind::Sqlite, "/tmp/local.db");

        store.save(std::slice::from_ref(&sqlite)).unwrap();
        assert!(store.path_for(DbKind::Sqlite).exists());

        store.save(&[]).unwrap();
        assert!(!store.path_for(DbKind::Sqlite).exists());
    }

    #[test]
    fn corrupt_document_is_skipped_and_never_rewritten() {
        let (_dir, mut store) = temp_store();
        let postgres = ConnectionProfile::new("pg", DbKind::Postgres, "pg://db");
        store.save(std::slice::from_ref(&postgres)).unwrap();
        fs::write(store.path_for(DbKind::MySql), "{ not json").unwrap();

        let mut loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, postgres.id);
        assert!(store.unreadable_kinds().contains(&DbKind::MySql));

        loaded.push(ConnectionProfile::new("local", DbKind::Sqlite, "/tmp/a.db"));
        store.save(&loaded).unwrap();

        assert!(store.path_for(DbKind::Postgres).exists());
        assert!(store.path_for(DbKind::Sqlite).exists());
        assert_eq!(
            fs::read_to_string(store.path_for(DbKind::MySql)).unwrap(),
            "{ not json"
        );

        store.save(&[]).unwrap();
        assert!(store.path_for(DbKind::MySql).exists());
    }

    #[test]
    fn saving_profiles_of_an_unreadable_kind_fails_before_writing() {
        let (_dir, mut store) = temp_store();
        fs::write(store.path_for(DbKind::MySql), "[ broken").unwrap();
        store.load();

        let profiles = [
            ConnectionProfile::new("local", DbKind::Sqlite, "/tmp/a.db"),
            ConnectionProfile::new("my", DbKind::MySql, "mysql://db"),
        ];
        let err = store.save(&profiles).unwrap_err();

        assert!(matches!(err, DbError::InvalidProfile(_)));
        assert!(!store.path_for(DbKind::Sqlite).exists());
        assert_eq!(
            fs::read_to_string(store.path_for(DbKind::MySql)).unwrap(),
            "[ broken"
        );
    }
}
