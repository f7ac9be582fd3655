//! Encryption pools the running instance is able to serve.

use std::collections::BTreeSet;

use parking_lot::RwLock;

use crate::core::job::EncryptionPoolId;

/// Source of the encryption pool ids this instance can decrypt.
pub trait EncryptionPoolProvider: Send + Sync {
    /// Currently supported pool ids. An empty set means no job is eligible.
    fn supported_pool_ids(&self) -> BTreeSet<EncryptionPoolId>;
}

/// Fixed pool set that can be swapped at runtime, e.g. after a key rotation.
#[derive(Debug, Default)]
pub struct StaticPoolProvider {
    ids: RwLock<BTreeSet<EncryptionPoolId>>,
}

impl StaticPoolProvider {
    /// Provider serving exactly `ids`.
    pub fn new(ids: impl IntoIterator<Item = EncryptionPoolId>) -> Self {
        Self {
            ids: RwLock::new(ids.into_iter().collect()),
        }
    }

    /// Replace the supported set.
    pub fn replace(&self, ids: impl IntoIterator<Item = EncryptionPoolId>) {
        *self.ids.write() = ids.into_iter().collect();
    }
}

impl EncryptionPoolProvider for StaticPoolProvider {
    fn supported_pool_ids(&self) -> BTreeSet<EncryptionPoolId> {
        self.ids.read().clone()
    }
}
