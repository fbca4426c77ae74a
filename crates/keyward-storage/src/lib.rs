//! Concrete `SecureStore` backends.
//! `KeyringStore` keeps entries in the OS keychain; `EncryptedFileStore` keeps
//! AES-GCM sealed entries on disk under a master key.

pub mod encrypted_file_store;
pub mod keyring_store;

pub use encrypted_file_store::EncryptedFileStore;
pub use keyring_store::KeyringStore;
