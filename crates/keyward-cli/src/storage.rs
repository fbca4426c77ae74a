use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use dirs::data_dir;
use keyward_core::{KeyGenerator, SecureStore};
use keyward_storage::{EncryptedFileStore, KeyringStore};
use tracing::debug;

use crate::config::{Backend, Config};

pub type DynStore = Arc<dyn SecureStore>;

/// Resolve the default data directory for Keyward.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("keyward"))
}

/// Build the store selected by config.
pub fn store_from_config(config: &Config) -> Result<DynStore> {
    match config.backend {
        Backend::Keyring => {
            debug!(service = config.service(), "initializing keychain store");
            Ok(Arc::new(KeyringStore::new(config.service())))
        }
        Backend::File => {
            let root = match &config.data_dir {
                Some(root) => root.clone(),
                None => default_data_dir()?,
            };
            debug!(?root, "initializing encrypted file store");
            let master = KeyringStore::new(config.service()).master_key()?;
            Ok(Arc::new(EncryptedFileStore::new(root, master)))
        }
    }
}

/// Generator over the configured store.
pub fn generator_from_config(config: &Config) -> Result<KeyGenerator<DynStore>> {
    Ok(KeyGenerator::new(store_from_config(config)?))
}

/// Helper for tests: a file store rooted at a temp dir with a throwaway master key.
#[cfg(test)]
pub fn test_generator(root: impl Into<PathBuf>) -> KeyGenerator<DynStore> {
    let store: DynStore = Arc::new(EncryptedFileStore::new(
        root,
        keyward_core::SymmetricKey::generate(),
    ));
    KeyGenerator::new(store)
}
