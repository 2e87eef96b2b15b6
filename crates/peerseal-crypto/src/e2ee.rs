//! Entry point wiring the key manager and the confirmation-code protocol.

use std::sync::Arc;

use peerseal_core::{Config, KeyStoreBackend};

use crate::cipher::{CipherProvider, X25519Cipher};
use crate::codegen::RandomCodeGenerator;
use crate::confirm::{ConfirmCodeProtocol, DEFAULT_CONFIRM_CODE_SALT};
use crate::error::CryptoError;
use crate::key_manager::{KeyCache, KeyManager};
use crate::store::{FileKeyStore, MemoryKeyStore, SecureKeyStore};

/// End-to-end encryption bootstrap for one local peer.
#[derive(Debug)]
pub struct E2ee {
    keys: KeyManager,
    codes: ConfirmCodeProtocol,
    salt: Vec<u8>,
}

impl E2ee {
    pub fn new(keys: KeyManager, codes: ConfirmCodeProtocol, salt: impl Into<Vec<u8>>) -> Self {
        Self {
            keys,
            codes,
            salt: salt.into(),
        }
    }

    /// In-memory keys, default protocol and salt. Nothing is persisted.
    pub fn in_memory() -> Self {
        Self::new(
            KeyManager::in_memory(),
            ConfirmCodeProtocol::default(),
            DEFAULT_CONFIRM_CODE_SALT,
        )
    }

    /// Build from a resolved config with a private key cache.
    pub fn from_config(config: &Config) -> Result<Self, CryptoError> {
        Self::from_config_with_cache(config, KeyCache::new())
    }

    /// Build from a resolved config, sharing `cache` with other instances.
    pub fn from_config_with_cache(config: &Config, cache: KeyCache) -> Result<Self, CryptoError> {
        config.validate()?;

        let cipher: Arc<dyn CipherProvider> = Arc::new(X25519Cipher);
        let store: Arc<dyn SecureKeyStore> = match config.keys.store {
            KeyStoreBackend::Memory => Arc::new(MemoryKeyStore::new()),
            KeyStoreBackend::File => Arc::new(FileKeyStore::new(config.resolved_store_dir()?)),
        };
        let salt = config
            .confirm_code
            .salt()?
            .unwrap_or_else(|| DEFAULT_CONFIRM_CODE_SALT.to_vec());

        tracing::info!(
            namespace = %config.keys.namespace,
            backend = ?config.keys.store,
            code_length = config.confirm_code.length,
            custom_salt = config.confirm_code.salt_hex.is_some(),
            "E2EE initialised"
        );

        let keys = KeyManager::new(Arc::clone(&cipher), store, cache, &config.keys);
        let codes = ConfirmCodeProtocol::new(
            cipher,
            Arc::new(RandomCodeGenerator),
            config.confirm_code.length,
        );
        Ok(Self::new(keys, codes, salt))
    }

    pub const fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub const fn codes(&self) -> &ConfirmCodeProtocol {
        &self.codes
    }

    /// Configured salt for confirmation-code key derivation.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Exported public key of the permanent identity.
    pub fn permanent_public_key(&self) -> Result<String, CryptoError> {
        self.keys.public_key(&self.keys.permanent_identity())
    }
}
