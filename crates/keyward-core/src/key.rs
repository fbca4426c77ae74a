//! Per-label symmetric keys backed by a [`SecureStore`].

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::storage::{SecureStore, SecureStoreError};

/// Length of a symmetric key in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// 256-bit symmetric key. Equality is over the raw bytes; the bytes are
/// wiped when the value is dropped and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_LEN],
}

impl SymmetricKey {
    /// Fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Rebuild a key from stored bytes; `None` unless exactly [`KEY_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

#[derive(Debug, Error)]
pub enum KeyAccessError {
    #[error("secure store error: {0}")]
    Store(#[from] SecureStoreError),
    #[error("stored key for label `{label}` is corrupt: {reason}")]
    CorruptKey { label: String, reason: String },
    #[error("label must not be empty")]
    InvalidLabel,
    #[error("key lock poisoned")]
    LockPoisoned,
}

/// Hands out one stable key per label, creating it on first request.
///
/// Creation runs under a per-label lock and finishes with a conditional
/// write, so concurrent first requests for the same label all observe the
/// key that reached the store first.
pub struct KeyGenerator<S: SecureStore> {
    store: S,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: SecureStore> KeyGenerator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the key for `label`, generating and persisting one if needed.
    #[instrument(skip_all, fields(label = %label))]
    pub fn encryption_key(&self, label: &str) -> Result<SymmetricKey, KeyAccessError> {
        if label.is_empty() {
            return Err(KeyAccessError::InvalidLabel);
        }

        if let Some(existing) = self.store.get(label)? {
            debug!("retrieved existing key");
            return decode_key(label, &existing);
        }

        let label_lock = self.label_lock(label)?;
        let _guard = label_lock
            .lock()
            .map_err(|_| KeyAccessError::LockPoisoned)?;

        // Another caller may have created it while we waited.
        if let Some(existing) = self.store.get(label)? {
            debug!("key created by concurrent caller");
            return decode_key(label, &existing);
        }

        let candidate = SymmetricKey::generate();
        let stored = self.store.put_if_absent(label, candidate.as_bytes())?;
        let key = decode_key(label, &stored)?;
        if key == candidate {
            info!("generated new key");
        } else {
            warn!("lost key creation race to another writer, using stored key");
        }
        Ok(key)
    }

    /// Wipe every entry in the backing store. Intended for resets and tests.
    pub fn clear_all(&self) -> Result<(), KeyAccessError> {
        self.store.remove_all()?;
        Ok(())
    }

    fn label_lock(&self, label: &str) -> Result<Arc<Mutex<()>>, KeyAccessError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        Ok(Arc::clone(locks.entry(label.to_string()).or_default()))
    }
}

fn decode_key(label: &str, bytes: &[u8]) -> Result<SymmetricKey, KeyAccessError> {
    SymmetricKey::from_bytes(bytes).ok_or_else(|| KeyAccessError::CorruptKey {
        label: label.to_string(),
        reason: format!("expected {KEY_LEN} bytes, got {}", bytes.len()),
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::AtomicUsize, atomic::Ordering, Barrier},
        thread,
    };

    use super::*;
    use crate::storage::InMemorySecureStore;

    #[test]
    fn same_label_returns_same_key() {
        let generator = KeyGenerator::new(InMemorySecureStore::new());
        let first = generator.encryption_key("test1").expect("first lookup");
        let again = generator.encryption_key("test1").expect("second lookup");
        assert_eq!(first, again);
    }

    #[test]
    fn distinct_labels_get_distinct_keys() {
        let generator = KeyGenerator::new(InMemorySecureStore::new());
        let a = generator.encryption_key("test1").expect("test1");
        let b = generator.encryption_key("test2").expect("test2");
        assert_ne!(a, b);
    }

    #[test]
    fn key_survives_a_new_generator_over_the_same_store() {
        let store = InMemorySecureStore::new();
        let first = KeyGenerator::new(store.clone())
            .encryption_key("persisted")
            .expect("first generator");
        let second = KeyGenerator::new(store)
            .encryption_key("persisted")
            .expect("second generator");
        assert_eq!(first, second);
    }

    #[test]
    fn clear_all_forces_a_new_key() {
        let generator = KeyGenerator::new(InMemorySecureStore::new());
        let before = generator.encryption_key("label").expect("before");
        generator.clear_all().expect("clear");
        assert!(generator.store().is_empty().expect("is_empty"));
        let after = generator.encryption_key("label").expect("after");
        assert_ne!(before, after);
    }

    #[test]
    fn empty_label_is_rejected() {
        let generator = KeyGenerator::new(InMemorySecureStore::new());
        let err = generator.encryption_key("").expect_err("empty label");
        assert!(matches!(err, KeyAccessError::InvalidLabel));
    }

    #[test]
    fn wrong_length_entry_is_corrupt() {
        let store = InMemorySecureStore::new();
        store.put("short", b"abcd").expect("seed corrupt entry");
        let generator = KeyGenerator::new(store);

        let err = generator.encryption_key("short").expect_err("corrupt key");
        assert!(matches!(err, KeyAccessError::CorruptKey { .. }));
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = SymmetricKey::generate();
        assert_eq!(format!("{key:?}"), "SymmetricKey([REDACTED])");
    }

    #[test]
    fn from_bytes_round_trips_and_checks_length() {
        let key = SymmetricKey::generate();
        let rebuilt = SymmetricKey::from_bytes(key.as_bytes()).expect("valid length");
        assert_eq!(key, rebuilt);
        assert!(SymmetricKey::from_bytes(&[0u8; 16]).is_none());
    }

    #[test]
    fn concurrent_first_requests_agree_on_one_key() {
        const CALLERS: usize = 1000;
        let generator = KeyGenerator::new(InMemorySecureStore::new());
        let barrier = Barrier::new(CALLERS);
        let (generator, barrier) = (&generator, &barrier);

        let keys: Vec<SymmetricKey> = thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        generator.encryption_key("singleLabel")
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread panicked").expect("key lookup"))
                .collect()
        });

        assert_eq!(keys.len(), CALLERS);
        assert!(keys.iter().all(|k| k == &keys[0]));
        assert_eq!(generator.store().len().expect("len"), 1);
    }

    /// Store whose conditional write always reports a different winner,
    /// standing in for another process that created the key first.
    struct RacingStore {
        inner: InMemorySecureStore,
        winner: SymmetricKey,
        conditional_writes: AtomicUsize,
    }

    impl SecureStore for RacingStore {
        fn get(&self, label: &str) -> Result<Option<Vec<u8>>, SecureStoreError> {
            self.inner.get(label)
        }

        fn put(&self, label: &str, value: &[u8]) -> Result<(), SecureStoreError> {
            self.inner.put(label, value)
        }

        fn put_if_absent(&self, label: &str, _value: &[u8]) -> Result<Vec<u8>, SecureStoreError> {
            self.conditional_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.put_if_absent(label, self.winner.as_bytes())
        }

        fn delete(&self, label: &str) -> Result<(), SecureStoreError> {
            self.inner.delete(label)
        }

        fn remove_all(&self) -> Result<(), SecureStoreError> {
            self.inner.remove_all()
        }
    }

    #[test]
    fn conditional_write_winner_is_returned() {
        let winner = SymmetricKey::generate();
        let generator = KeyGenerator::new(RacingStore {
            inner: InMemorySecureStore::new(),
            winner: winner.clone(),
            conditional_writes: AtomicUsize::new(0),
        });

        let key = generator.encryption_key("contended").expect("lookup");
        assert_eq!(key, winner);
        assert_eq!(generator.store().conditional_writes.load(Ordering::SeqCst), 1);
    }

    struct UnavailableStore;

    impl SecureStore for UnavailableStore {
        fn get(&self, _label: &str) -> Result<Option<Vec<u8>>, SecureStoreError> {
            Err(SecureStoreError::Unavailable {
                reason: "locked".into(),
            })
        }

        fn put(&self, _label: &str, _value: &[u8]) -> Result<(), SecureStoreError> {
            unreachable!("generator never overwrites")
        }

        fn put_if_absent(&self, _label: &str, _value: &[u8]) -> Result<Vec<u8>, SecureStoreError> {
            unreachable!("read fails first")
        }

        fn delete(&self, _label: &str) -> Result<(), SecureStoreError> {
            Ok(())
        }

        fn remove_all(&self) -> Result<(), SecureStoreError> {
            Ok(())
        }
    }

    #[test]
    fn store_failure_is_not_replaced_by_ephemeral_key() {
        let generator = KeyGenerator::new(UnavailableStore);
        let err = generator.encryption_key("any").expect_err("store is down");
        assert!(matches!(
            err,
            KeyAccessError::Store(SecureStoreError::Unavailable { .. })
        ));
    }
}
