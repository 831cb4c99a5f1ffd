//! Credential store capability and a JSON-backed implementation.
//!
//! Associations are kept the way KeePassHTTP has always kept them: as string
//! fields named `"AES Key: <name>"` holding the base64 key, inside a
//! dedicated settings entry of the credential database.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kphttp_crypto::AssociationKey;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Prefix of settings fields that hold association keys.
pub const ASSOCIATE_KEY_PREFIX: &str = "AES Key: ";

/// Title of the settings entry.
pub const SETTINGS_ENTRY_TITLE: &str = "KeePassHttp Settings";

/// UUID of the settings entry (`NGl6QIpbQcCfNol9Yj7LMQ==` in base64).
pub const SETTINGS_ENTRY_UUID: Uuid = Uuid::from_u128(0x3469_7a40_8a5b_41c0_9f36_897d_623e_cb31);

/// The credential database, as seen by the protocol engine.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Opaque identity of the open database. The response hash is derived
    /// from it.
    async fn fingerprint(&self) -> Result<String>;

    /// Key stored under exactly `name`.
    async fn find_association(&self, name: &str) -> Result<Option<AssociationKey>>;

    /// Names of all stored associations.
    async fn association_names(&self) -> Result<Vec<String>>;

    /// Store `key` under exactly `name`, replacing a record of that exact name.
    async fn put_association(&self, name: &str, key: &AssociationKey) -> Result<()>;

    /// Delete the record stored under exactly `name`.
    async fn remove_association(&self, name: &str) -> Result<bool>;

    /// Delete every record whose name matches `name` ignoring case, then
    /// store `key` under exactly `name`, as a single change.
    async fn replace_association(&self, name: &str, key: &AssociationKey) -> Result<()>;

    /// Entries whose title or URL contains `term`, in store order.
    async fn search(&self, term: &str) -> Result<Vec<CredentialEntry>>;
}

/// A credential as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub uuid: Uuid,
    pub title: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub url: String,
    /// Custom string fields.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl CredentialEntry {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            title: title.into(),
            username: String::new(),
            password: String::new(),
            url: String::new(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Uppercase hex form of the UUID, as reported to clients.
    pub fn uuid_hex(&self) -> String {
        self.uuid.simple().to_string().to_uppercase()
    }

    /// Case-insensitive substring match on title or URL.
    ///
    /// An empty term matches nothing.
    pub fn matches(&self, term: &str) -> bool {
        if term.is_empty() {
            return false;
        }
        let term = term.to_lowercase();
        self.title.to_lowercase().contains(&term) || self.url.to_lowercase().contains(&term)
    }

    fn is_settings(&self) -> bool {
        self.uuid == SETTINGS_ENTRY_UUID
    }
}

/// Serializable credential database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub root_group_uuid: Uuid,
    pub recycle_bin_uuid: Uuid,
    #[serde(default)]
    pub entries: Vec<CredentialEntry>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// An empty database with fresh group identifiers.
    pub fn new() -> Self {
        Self {
            root_group_uuid: Uuid::new_v4(),
            recycle_bin_uuid: Uuid::new_v4(),
            entries: Vec::new(),
        }
    }

    /// Load a database from a JSON file. Returns a new empty database if the
    /// file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| Error::Store(format!("Failed to parse database {}: {e}", path.display())))
    }

    /// Save the database to a JSON file, readable by the owner only.
    ///
    /// The data goes to a sibling temp file first and is renamed over
    /// `path`, so a failed save leaves the previous file intact.
    pub fn save(&self, path: &Path) -> Result<()> {
        use std::io::Write;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;

        let tmp = path.with_extension("json.tmp");
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let written = options.open(&tmp).and_then(|mut file| {
            file.write_all(json.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| std::fs::rename(&tmp, path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Hex of the root group UUID followed by hex of the recycle-bin UUID.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}{}",
            self.root_group_uuid.simple(),
            self.recycle_bin_uuid.simple()
        )
    }

    pub fn settings(&self) -> Option<&CredentialEntry> {
        self.entries.iter().find(|e| e.is_settings())
    }

    /// The settings entry, created on first use.
    fn settings_mut(&mut self) -> &mut CredentialEntry {
        let index = match self.entries.iter().position(CredentialEntry::is_settings) {
            Some(index) => index,
            None => {
                let mut entry = CredentialEntry::new(SETTINGS_ENTRY_TITLE);
                entry.uuid = SETTINGS_ENTRY_UUID;
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    pub fn association(&self, name: &str) -> Option<&str> {
        self.settings()?
            .fields
            .get(&format!("{ASSOCIATE_KEY_PREFIX}{name}"))
            .map(String::as_str)
    }

    pub fn association_names(&self) -> Vec<String> {
        self.settings()
            .map(|s| {
                s.fields
                    .keys()
                    .filter_map(|k| k.strip_prefix(ASSOCIATE_KEY_PREFIX))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_association(&mut self, name: &str, key_base64: String) {
        self.settings_mut()
            .fields
            .insert(format!("{ASSOCIATE_KEY_PREFIX}{name}"), key_base64);
    }

    /// Drop every association whose name equals `name` ignoring case.
    pub fn remove_associations_ignoring_case(&mut self, name: &str) -> usize {
        let wanted = name.to_lowercase();
        let Some(settings) = self.entries.iter_mut().find(|e| e.is_settings()) else {
            return 0;
        };
        let before = settings.fields.len();
        settings.fields.retain(|field, _| {
            field
                .strip_prefix(ASSOCIATE_KEY_PREFIX)
                .is_none_or(|existing| existing.to_lowercase() != wanted)
        });
        before - settings.fields.len()
    }

    pub fn remove_association(&mut self, name: &str) -> bool {
        let field = format!("{ASSOCIATE_KEY_PREFIX}{name}");
        self.entries
            .iter_mut()
            .find(|e| e.is_settings())
            .is_some_and(|s| s.fields.remove(&field).is_some())
    }

    /// Entries matching `term`, settings entry excluded.
    pub fn search(&self, term: &str) -> Vec<CredentialEntry> {
        self.entries
            .iter()
            .filter(|e| !e.is_settings() && e.matches(term))
            .cloned()
            .collect()
    }
}

/// [`CredentialStore`] over an in-memory [`Database`], optionally written
/// back to a JSON file after every association change.
pub struct JsonCredentialStore {
    db: RwLock<Database>,
    path: Option<PathBuf>,
}

impl JsonCredentialStore {
    pub fn in_memory(db: Database) -> Self {
        Self {
            db: RwLock::new(db),
            path: None,
        }
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::load(path)?;
        if !path.exists() {
            db.save(path)?;
        }
        Ok(Self {
            db: RwLock::new(db),
            path: Some(path.to_path_buf()),
        })
    }

    pub async fn snapshot(&self) -> Database {
        self.db.read().await.clone()
    }

    fn persist(&self, db: &Database) -> Result<()> {
        if let Some(path) = &self.path {
            db.save(path)?;
            debug!(path = %path.display(), "database saved");
        }
        Ok(())
    }

    /// Apply `change` to a copy of the database, save it, and only then
    /// make it current. A failed save leaves the store untouched.
    async fn commit<T>(&self, change: impl FnOnce(&mut Database) -> T) -> Result<T> {
        let mut db = self.db.write().await;
        let mut next = db.clone();
        let outcome = change(&mut next);
        self.persist(&next)?;
        *db = next;
        Ok(outcome)
    }
}

#[async_trait]
impl CredentialStore for JsonCredentialStore {
    async fn fingerprint(&self) -> Result<String> {
        Ok(self.db.read().await.fingerprint())
    }

    async fn find_association(&self, name: &str) -> Result<Option<AssociationKey>> {
        let db = self.db.read().await;
        db.association(name)
            .map(|text| AssociationKey::from_base64(text).map_err(Error::from))
            .transpose()
    }

    async fn association_names(&self) -> Result<Vec<String>> {
        Ok(self.db.read().await.association_names())
    }

    async fn put_association(&self, name: &str, key: &AssociationKey) -> Result<()> {
        self.commit(|db| db.set_association(name, key.to_base64())).await
    }

    async fn remove_association(&self, name: &str) -> Result<bool> {
        if self.db.read().await.association(name).is_none() {
            return Ok(false);
        }
        self.commit(|db| db.remove_association(name)).await
    }

    async fn replace_association(&self, name: &str, key: &AssociationKey) -> Result<()> {
        self.commit(|db| {
            let removed = db.remove_associations_ignoring_case(name);
            db.set_association(name, key.to_base64());
            debug!(removed, "association records replaced");
        })
        .await
    }

    async fn search(&self, term: &str) -> Result<Vec<CredentialEntry>> {
        Ok(self.db.read().await.search(term))
    }
}
