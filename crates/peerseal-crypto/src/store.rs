//! Secure key store.
//!
//! Private keys are persisted as opaque blobs keyed by [`KeyIdentity`].
//! A missing entry is `Ok(None)`; every other failure is a
//! [`CryptoError::KeyStore`] so callers never mistake an unreadable key
//! for an absent one.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use zeroize::Zeroizing;

pub use peerseal_core::AccessPolicy;

use crate::error::CryptoError;

/// Lookup key for a persisted key pair: a name scoped by a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyIdentity {
    pub name: String,
    pub namespace: String,
}

impl KeyIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for KeyIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Durable storage for private key bytes.
pub trait SecureKeyStore: Send + Sync {
    /// Read the blob stored under `identity`, or `None` if there is none.
    fn read(&self, identity: &KeyIdentity) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError>;

    /// Store `secret` under `identity`. Fails if an entry already exists.
    fn insert(
        &self,
        identity: &KeyIdentity,
        secret: &[u8],
        policy: AccessPolicy,
    ) -> Result<(), CryptoError>;

    /// Delete the entry for `identity`. Returns whether one existed.
    fn remove(&self, identity: &KeyIdentity) -> Result<bool, CryptoError>;
}

struct StoredKey {
    secret: Zeroizing<Vec<u8>>,
    policy: AccessPolicy,
}

/// Process-local key store. Contents are lost when dropped.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<KeyIdentity, StoredKey>>,
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.entries.lock().map(|e| e.len()).unwrap_or_default();
        f.debug_struct("MemoryKeyStore")
            .field("entries", &len)
            .finish()
    }
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy recorded for `identity`, if stored.
    pub fn policy_of(&self, identity: &KeyIdentity) -> Result<Option<AccessPolicy>, CryptoError> {
        Ok(self.lock()?.get(identity).map(|stored| stored.policy))
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<KeyIdentity, StoredKey>>, CryptoError> {
        self.entries
            .lock()
            .map_err(|_| CryptoError::KeyStore("memory key store lock poisoned".into()))
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn read(&self, identity: &KeyIdentity) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        Ok(self.lock()?.get(identity).map(|stored| stored.secret.clone()))
    }

    fn insert(
        &self,
        identity: &KeyIdentity,
        secret: &[u8],
        policy: AccessPolicy,
    ) -> Result<(), CryptoError> {
        let mut entries = self.lock()?;
        if entries.contains_key(identity) {
            return Err(CryptoError::KeyStore(format!(
                "entry already exists for {identity}"
            )));
        }
        entries.insert(
            identity.clone(),
            StoredKey {
                secret: Zeroizing::new(secret.to_vec()),
                policy,
            },
        );
        Ok(())
    }

    fn remove(&self, identity: &KeyIdentity) -> Result<bool, CryptoError> {
        Ok(self.lock()?.remove(identity).is_some())
    }
}

/// Owner-only key files in a single directory.
///
/// File names are the SHA-256 of the identity, so arbitrary names and
/// namespaces cannot address paths outside `dir`. A secret is fully written
/// to a scratch file and then hard-linked to its entry name. The link fails
/// if the entry exists, so `insert` is an atomic check-and-set across
/// processes, and a reader never observes a partially written key.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `identity`.
    pub fn path_for(&self, identity: &KeyIdentity) -> PathBuf {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(identity.namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(identity.name.as_bytes());
        self.dir
            .join(format!("{}.key", hex::encode(hasher.finalize())))
    }

    /// Unique scratch file in `dir`. Never matches a `.key` entry name.
    fn staging_path(&self) -> PathBuf {
        self.dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()))
    }

    fn create_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }
}

fn store_err(action: &str, identity: &KeyIdentity, err: &std::io::Error) -> CryptoError {
    CryptoError::KeyStore(format!("failed to {action} key {identity}: {err}"))
}

impl SecureKeyStore for FileKeyStore {
    fn read(&self, identity: &KeyIdentity) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        let path = self.path_for(identity);
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_err("stat", identity, &e)),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode() & 0o777;
            if mode != 0o600 {
                return Err(CryptoError::KeyStore(format!(
                    "key file for {identity} has insecure permissions: {mode:o} (expected 600)"
                )));
            }
        }
        #[cfg(not(unix))]
        let _ = metadata;

        let bytes = std::fs::read(&path).map_err(|e| store_err("read", identity, &e))?;
        Ok(Some(Zeroizing::new(bytes)))
    }

    fn insert(
        &self,
        identity: &KeyIdentity,
        secret: &[u8],
        policy: AccessPolicy,
    ) -> Result<(), CryptoError> {
        self.create_dir()
            .map_err(|e| store_err("prepare directory for", identity, &e))?;
        let path = self.path_for(identity);
        let staging = self.staging_path();

        let staged = write_owner_only(&staging, secret)
            .map_err(|e| store_err("write", identity, &e))
            .and_then(|()| {
                std::fs::hard_link(&staging, &path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::AlreadyExists {
                        CryptoError::KeyStore(format!("entry already exists for {identity}"))
                    } else {
                        store_err("publish", identity, &e)
                    }
                })
            });
        std::fs::remove_file(&staging).ok();
        staged?;

        tracing::debug!(%identity, ?policy, "Persisted key file");
        Ok(())
    }

    fn remove(&self, identity: &KeyIdentity) -> Result<bool, CryptoError> {
        match std::fs::remove_file(self.path_for(identity)) {
            Ok(()) => {
                tracing::debug!(%identity, "Removed key file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(store_err("remove", identity, &e)),
        }
    }
}

/// Create `path` exclusively with mode 0600 and flush `secret` to disk.
fn write_owner_only(path: &Path, secret: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(secret)?;
    file.sync_all()
}
