//! Association key lifecycle.
//!
//! Maps client-chosen key names to shared keys on top of a
//! [`CredentialStore`]. Lookups are exact; name conflicts are detected
//! case-insensitively and are only resolved by an explicit overwrite.

use std::sync::Arc;

use kphttp_crypto::AssociationKey;
use tracing::info;

use crate::error::Result;
use crate::store::CredentialStore;

/// Outcome of [`AssociationStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Committed,
    /// A record whose name differs at most in case already exists.
    Conflict { existing: String },
}

#[derive(Clone)]
pub struct AssociationStore {
    store: Arc<dyn CredentialStore>,
}

impl AssociationStore {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Key of the association named exactly `id`.
    ///
    /// `None` means an unknown client, not a failure.
    pub async fn lookup(&self, id: &str) -> Result<Option<AssociationKey>> {
        if id.is_empty() {
            return Ok(None);
        }
        self.store.find_association(id).await
    }

    /// Existing name that collides with `name`, ignoring case.
    pub async fn find_conflict(&self, name: &str) -> Result<Option<String>> {
        let wanted = name.to_lowercase();
        Ok(self
            .store
            .association_names()
            .await?
            .into_iter()
            .find(|existing| existing.to_lowercase() == wanted))
    }

    /// Insert a new association unless the name is taken.
    pub async fn put(&self, name: &str, key: &AssociationKey) -> Result<PutOutcome> {
        if let Some(existing) = self.find_conflict(name).await? {
            return Ok(PutOutcome::Conflict { existing });
        }
        self.store.put_association(name, key).await?;
        info!(name, "association stored");
        Ok(PutOutcome::Committed)
    }

    /// Replace every association whose name matches `name` ignoring case.
    ///
    /// Afterwards the store looks exactly as if the old records had been
    /// deleted and `name` inserted. Either all of that happens or none.
    pub async fn overwrite(&self, name: &str, key: &AssociationKey) -> Result<()> {
        self.store.replace_association(name, key).await?;
        info!(name, "association overwritten");
        Ok(())
    }
}
