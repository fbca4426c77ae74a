//! Core abstractions for Keyward: the secure store contract, per-label key
//! generation, and authenticated encryption over generated keys.
//! Concrete keychain and file backends live in `keyward-storage`.

pub mod encryptor;
pub mod key;
pub mod storage;

pub use encryptor::{decrypt, encrypt, DecryptionError, EncryptedPayload, EncryptionError};
pub use key::{KeyAccessError, KeyGenerator, SymmetricKey, KEY_LEN};
pub use storage::{InMemorySecureStore, SecureStore, SecureStoreError};
