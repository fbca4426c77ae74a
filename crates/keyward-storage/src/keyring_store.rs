use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
};

use keyring::Entry;
use keyward_core::{KeyAccessError, KeyGenerator, SecureStore, SecureStoreError, SymmetricKey};
use tracing::{debug, instrument, warn};

/// Keychain account holding the JSON list of labels this store has written.
pub const INDEX_ACCOUNT: &str = "keyward.index";

/// Account of the key that seals the file backend's entries.
pub const MASTER_ACCOUNT: &str = "keyward.master";

/// Appended to the service name to form the master key's own service.
const MASTER_SERVICE_SUFFIX: &str = ".master";

/// Raw credential access, one secret per `(service, account)`.
pub(crate) trait Keychain: Send + Sync {
    fn read(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, SecureStoreError>;
    fn write(&self, service: &str, account: &str, value: &[u8]) -> Result<(), SecureStoreError>;
    /// Idempotent.
    fn remove(&self, service: &str, account: &str) -> Result<(), SecureStoreError>;
}

/// The platform credential store via the `keyring` crate.
struct OsKeychain;

impl Keychain for OsKeychain {
    fn read(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, SecureStoreError> {
        match entry(service, account)?.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(keyring_err(err)),
        }
    }

    fn write(&self, service: &str, account: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        entry(service, account)?
            .set_secret(value)
            .map_err(keyring_err)
    }

    fn remove(&self, service: &str, account: &str) -> Result<(), SecureStoreError> {
        match entry(service, account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(keyring_err(err)),
        }
    }
}

fn entry(service: &str, account: &str) -> Result<Entry, SecureStoreError> {
    Entry::new(service, account).map_err(keyring_err)
}

/// OS keychain-backed store. Each label is an entry `(service, label)`.
///
/// Keychains cannot be enumerated portably, so labels are also tracked in an
/// index entry to support `remove_all`. A label is indexed before its entry
/// is written, so every entry this store creates is reachable from the index.
/// Writes are serialized in-process; the keychain itself offers no
/// conditional write.
pub struct KeyringStore {
    service: String,
    keychain: Arc<dyn Keychain>,
    write_lock: Mutex<()>,
    holds_master: bool,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_keychain(service, Arc::new(OsKeychain))
    }

    pub(crate) fn with_keychain(service: impl Into<String>, keychain: Arc<dyn Keychain>) -> Self {
        Self {
            service: service.into(),
            keychain,
            write_lock: Mutex::new(()),
            holds_master: false,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Store for the master key, under a service of its own so that clearing
    /// this store never destroys it.
    pub fn master_store(&self) -> KeyringStore {
        KeyringStore {
            service: format!("{}{MASTER_SERVICE_SUFFIX}", self.service),
            keychain: Arc::clone(&self.keychain),
            write_lock: Mutex::new(()),
            holds_master: true,
        }
    }

    /// The file backend's master key, created on first use.
    pub fn master_key(&self) -> Result<SymmetricKey, KeyAccessError> {
        KeyGenerator::new(self.master_store()).encryption_key(MASTER_ACCOUNT)
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, ()>, SecureStoreError> {
        self.write_lock.lock().map_err(|err| SecureStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }

    fn check_label(&self, label: &str) -> Result<(), SecureStoreError> {
        let reserved = label == INDEX_ACCOUNT || (label == MASTER_ACCOUNT && !self.holds_master);
        if reserved {
            return Err(SecureStoreError::Storage {
                reason: format!("label `{label}` is reserved"),
            });
        }
        Ok(())
    }

    fn read(&self, account: &str) -> Result<Option<Vec<u8>>, SecureStoreError> {
        self.keychain.read(&self.service, account)
    }

    fn write(&self, account: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        self.keychain.write(&self.service, account, value)
    }

    fn remove(&self, account: &str) -> Result<(), SecureStoreError> {
        self.keychain.remove(&self.service, account)
    }

    fn load_index(&self) -> Result<BTreeSet<String>, SecureStoreError> {
        match self.read(INDEX_ACCOUNT)? {
            Some(raw) => decode_index(&raw),
            None => Ok(BTreeSet::new()),
        }
    }

    fn save_index(&self, labels: &BTreeSet<String>) -> Result<(), SecureStoreError> {
        if labels.is_empty() {
            return self.remove(INDEX_ACCOUNT);
        }
        self.write(INDEX_ACCOUNT, &encode_index(labels)?)
    }

    /// Add `label` to the index; returns whether it was newly added.
    fn track(&self, label: &str) -> Result<bool, SecureStoreError> {
        let mut labels = self.load_index()?;
        if !labels.insert(label.to_string()) {
            return Ok(false);
        }
        self.save_index(&labels)?;
        Ok(true)
    }

    fn untrack(&self, label: &str) -> Result<(), SecureStoreError> {
        let mut labels = self.load_index()?;
        if labels.remove(label) {
            self.save_index(&labels)?;
        }
        Ok(())
    }

    /// Index, then write. A failed write drops the index entry it added.
    fn write_tracked(&self, label: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        let newly_tracked = self.track(label)?;
        if let Err(err) = self.write(label, value) {
            if newly_tracked {
                if let Err(rollback) = self.untrack(label) {
                    warn!("failed to drop index entry after write error: {rollback}");
                }
            }
            return Err(err);
        }
        Ok(())
    }
}

impl SecureStore for KeyringStore {
    #[instrument(skip_all, fields(label = %label))]
    fn get(&self, label: &str) -> Result<Option<Vec<u8>>, SecureStoreError> {
        self.check_label(label)?;
        self.read(label)
    }

    #[instrument(skip_all, fields(label = %label))]
    fn put(&self, label: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        self.check_label(label)?;
        let _guard = self.write_guard()?;
        self.write_tracked(label, value)
    }

    #[instrument(skip_all, fields(label = %label))]
    fn put_if_absent(&self, label: &str, value: &[u8]) -> Result<Vec<u8>, SecureStoreError> {
        self.check_label(label)?;
        let _guard = self.write_guard()?;
        if let Some(existing) = self.read(label)? {
            debug!("entry already present, keeping existing value");
            return Ok(existing);
        }
        self.write_tracked(label, value)?;
        Ok(value.to_vec())
    }

    #[instrument(skip_all, fields(label = %label))]
    fn delete(&self, label: &str) -> Result<(), SecureStoreError> {
        self.check_label(label)?;
        let _guard = self.write_guard()?;
        self.remove(label)?;
        self.untrack(label)
    }

    #[instrument(skip_all, fields(service = %self.service))]
    fn remove_all(&self) -> Result<(), SecureStoreError> {
        let _guard = self.write_guard()?;
        let labels = self.load_index()?;
        for label in &labels {
            if let Err(err) = self.remove(label) {
                warn!(%label, "failed to remove keychain entry: {err}");
                return Err(err);
            }
        }
        self.remove(INDEX_ACCOUNT)?;
        debug!(count = labels.len(), "removed keychain entries");
        Ok(())
    }
}

fn encode_index(labels: &BTreeSet<String>) -> Result<Vec<u8>, SecureStoreError> {
    serde_json::to_vec(labels).map_err(|e| SecureStoreError::Storage {
        reason: format!("index encode failed: {e}"),
    })
}

fn decode_index(raw: &[u8]) -> Result<BTreeSet<String>, SecureStoreError> {
    serde_json::from_slice(raw).map_err(|e| SecureStoreError::Storage {
        reason: format!("index decode failed: {e}"),
    })
}

fn keyring_err(err: keyring::Error) -> SecureStoreError {
    match err {
        keyring::Error::NoStorageAccess(inner) => SecureStoreError::Unavailable {
            reason: inner.to_string(),
        },
        other => SecureStoreError::Storage {
            reason: format!("keyring: {other}"),
        },
    }
}
