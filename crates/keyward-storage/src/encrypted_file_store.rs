use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use keyward_core::{decrypt, encrypt, SecureStore, SecureStoreError, SymmetricKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

const ENTRY_VERSION: u32 = 1;

/// Subdirectory of the root that holds entry files and nothing else.
pub const ENTRY_DIR: &str = "entries";

/// Prefix of in-flight writes inside [`ENTRY_DIR`].
const TEMP_PREFIX: &str = ".keyward-tmp";

/// Length of an entry file name: unpadded base64 of a SHA-256 digest.
const ENTRY_NAME_LEN: usize = 43;

/// Directory-backed store: one AES-GCM sealed file per label under
/// `<root>/entries`, named by the SHA-256 digest of the label.
///
/// Conditional writes use `persist_noclobber`, so the first writer of a label
/// wins even across processes sharing the directory.
pub struct EncryptedFileStore {
    root: PathBuf,
    master_key: SymmetricKey,
}

impl EncryptedFileStore {
    pub fn new(root: impl Into<PathBuf>, master_key: SymmetricKey) -> Self {
        Self {
            root: root.into(),
            master_key,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self) -> PathBuf {
        self.root.join(ENTRY_DIR)
    }

    fn path_for(&self, label: &str) -> PathBuf {
        self.entry_dir().join(entry_name(label))
    }

    fn seal(&self, value: &[u8]) -> Result<NamedTempFile, SecureStoreError> {
        let dir = self.entry_dir();
        fs::create_dir_all(&dir).map_err(storage_err)?;

        let payload = encrypt(value, &self.master_key).map_err(storage_err)?;
        let entry = StoredEntry {
            version: ENTRY_VERSION,
            payload: STANDARD.encode(payload.as_bytes()),
        };
        let json = serde_json::to_vec(&entry).map_err(storage_err)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&dir)
            .map_err(storage_err)?;
        tmp.write_all(&json).map_err(storage_err)?;
        tmp.flush().map_err(storage_err)?;
        Ok(tmp)
    }

    fn open(&self, path: &Path) -> Result<Option<Vec<u8>>, SecureStoreError> {
        let Some(entry) = read_entry(path)? else {
            return Ok(None);
        };
        if entry.version != ENTRY_VERSION {
            return Err(SecureStoreError::Storage {
                reason: format!("unsupported entry version {}", entry.version),
            });
        }

        let payload = STANDARD
            .decode(entry.payload)
            .map_err(|e| SecureStoreError::Storage {
                reason: format!("payload decode failed: {e}"),
            })?;
        decrypt(payload, &self.master_key)
            .map(Some)
            .map_err(|e| SecureStoreError::Storage {
                reason: format!("unseal failed: {e}"),
            })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    version: u32,
    payload: String,
}

impl SecureStore for EncryptedFileStore {
    #[instrument(skip_all, fields(label = %label))]
    fn get(&self, label: &str) -> Result<Option<Vec<u8>>, SecureStoreError> {
        self.open(&self.path_for(label))
    }

    #[instrument(skip_all, fields(label = %label))]
    fn put(&self, label: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        let tmp = self.seal(value)?;
        tmp.persist(self.path_for(label))
            .map_err(|e| storage_err(e.error))?;
        Ok(())
    }

    #[instrument(skip_all, fields(label = %label))]
    fn put_if_absent(&self, label: &str, value: &[u8]) -> Result<Vec<u8>, SecureStoreError> {
        let path = self.path_for(label);
        let tmp = self.seal(value)?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(value.to_vec()),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                debug!("entry already present, keeping existing value");
                self.open(&path)?.ok_or_else(|| SecureStoreError::Storage {
                    reason: "entry vanished during conditional write".to_string(),
                })
            }
            Err(err) => Err(storage_err(err.error)),
        }
    }

    #[instrument(skip_all, fields(label = %label))]
    fn delete(&self, label: &str) -> Result<(), SecureStoreError> {
        match fs::remove_file(self.path_for(label)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_err(err)),
        }
    }

    #[instrument(skip_all)]
    fn remove_all(&self) -> Result<(), SecureStoreError> {
        let entries = match fs::read_dir(self.entry_dir()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(storage_err(err)),
        };

        for entry in entries {
            let path = entry.map_err(storage_err)?.path();
            if !path.is_file() || !is_owned_file(&path) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(storage_err(err)),
            }
        }
        Ok(())
    }
}

fn read_entry(path: &Path) -> Result<Option<StoredEntry>, SecureStoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    serde_json::from_slice(&buf).map(Some).map_err(storage_err)
}

/// Fixed-length file name for any label, however long.
fn entry_name(label: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(label.as_bytes()))
}

/// Entry files and this store's leftover temp files; anything else in the
/// directory is left alone.
fn is_owned_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with(TEMP_PREFIX) {
        return true;
    }
    name.len() == ENTRY_NAME_LEN
        && URL_SAFE_NO_PAD
            .decode(name)
            .is_ok_and(|digest| digest.len() == 32)
}

fn storage_err<E: ToString>(err: E) -> SecureStoreError {
    SecureStoreError::Storage {
        reason: err.to_string(),
    }
}
