//! Key pair resolution: cache, then secure store, then generate-and-persist.
//!
//! ## Resolution pipeline
//!
//! 1. [`KeyCache`] slot for the identity already populated → return it.
//! 2. [`SecureKeyStore::read`] finds a blob → rebuild the pair, cache it.
//! 3. Store reports no entry → generate, persist the raw secret, cache it.
//!
//! A store read error is never treated as "absent". Each identity has its own
//! slot lock, held across steps 2 and 3, so concurrent first resolutions of
//! one identity perform at most one generate-and-persist.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use peerseal_core::config::KeyConfig;
use uuid::Uuid;

use crate::cipher::{CipherProvider, X25519Cipher};
use crate::error::CryptoError;
use crate::keypair::KeyPair;
use crate::store::{AccessPolicy, KeyIdentity, MemoryKeyStore, SecureKeyStore};

/// Name prefix for identities minted by [`KeyManager::create_ephemeral`].
pub const EPHEMERAL_PREFIX: &str = "e2ee.ephemeral.";

type Slot = Arc<Mutex<Option<Arc<KeyPair>>>>;

fn poisoned(what: &str) -> CryptoError {
    CryptoError::KeyStore(format!("{what} lock poisoned"))
}

/// In-memory key pair cache with one lock per identity.
///
/// Clones share the same underlying cache. Resolved entries stay until the
/// identity is retired through [`KeyManager::retire`]. A slot whose
/// resolution failed is dropped again once no other caller is waiting on it.
#[derive(Clone, Default)]
pub struct KeyCache {
    slots: Arc<Mutex<HashMap<KeyIdentity, Slot>>>,
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.slots.lock().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("KeyCache").field("slots", &len).finish()
    }
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, identity: &KeyIdentity) -> Result<Slot, CryptoError> {
        let mut slots = self.slots.lock().map_err(|_| poisoned("key cache"))?;
        Ok(Arc::clone(slots.entry(identity.clone()).or_default()))
    }

    /// Drop the map entry for `identity` if it is still `slot` and nobody
    /// else holds it. New holders are only handed out under the map lock,
    /// so the count cannot grow while we check it.
    fn release(&self, identity: &KeyIdentity, slot: Slot) -> Result<(), CryptoError> {
        let mut slots = self.slots.lock().map_err(|_| poisoned("key cache"))?;
        let unused = slots
            .get(identity)
            .is_some_and(|held| Arc::ptr_eq(held, &slot) && Arc::strong_count(&slot) == 2);
        if unused {
            slots.remove(identity);
        }
        Ok(())
    }

    /// Whether a resolved pair is cached for `identity`.
    pub fn contains(&self, identity: &KeyIdentity) -> Result<bool, CryptoError> {
        let slot = {
            let slots = self.slots.lock().map_err(|_| poisoned("key cache"))?;
            match slots.get(identity) {
                Some(slot) => Arc::clone(slot),
                None => return Ok(false),
            }
        };
        let cached = slot.lock().map_err(|_| poisoned("key slot"))?;
        Ok(cached.is_some())
    }
}

fn in_use(identity: &KeyIdentity) -> CryptoError {
    CryptoError::KeyGeneration(format!("ephemeral identity {identity} is already in use"))
}

/// Resolves key pairs for identities.
pub struct KeyManager {
    cipher: Arc<dyn CipherProvider>,
    store: Arc<dyn SecureKeyStore>,
    cache: KeyCache,
    namespace: String,
    permanent_key_name: String,
    policy: AccessPolicy,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("namespace", &self.namespace)
            .field("permanent_key_name", &self.permanent_key_name)
            .field("policy", &self.policy)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    pub fn new(
        cipher: Arc<dyn CipherProvider>,
        store: Arc<dyn SecureKeyStore>,
        cache: KeyCache,
        settings: &KeyConfig,
    ) -> Self {
        Self {
            cipher,
            store,
            cache,
            namespace: settings.namespace.clone(),
            permanent_key_name: settings.permanent_key_name.clone(),
            policy: settings.access_policy,
        }
    }

    /// Manager over a fresh in-memory store and cache with default settings.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(X25519Cipher),
            Arc::new(MemoryKeyStore::new()),
            KeyCache::new(),
            &KeyConfig::default(),
        )
    }

    pub fn cipher(&self) -> &dyn CipherProvider {
        self.cipher.as_ref()
    }

    pub const fn cache(&self) -> &KeyCache {
        &self.cache
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The stable identity used for permanent invites.
    pub fn permanent_identity(&self) -> KeyIdentity {
        KeyIdentity::new(&self.permanent_key_name, &self.namespace)
    }

    /// Return the key pair for `identity`, loading or creating it once.
    pub fn resolve(&self, identity: &KeyIdentity) -> Result<Arc<KeyPair>, CryptoError> {
        let slot = self.cache.slot(identity)?;
        let resolved = {
            let mut cached = slot.lock().map_err(|_| poisoned("key slot"))?;
            if let Some(pair) = cached.as_ref() {
                tracing::trace!(%identity, "Key pair served from cache");
                return Ok(Arc::clone(pair));
            }
            self.load_or_create(identity).map(|pair| {
                let pair = Arc::new(pair);
                *cached = Some(Arc::clone(&pair));
                pair
            })
        };
        if resolved.is_err() {
            self.cache.release(identity, slot)?;
        }
        resolved
    }

    /// Exported public key for `identity`, resolving the pair if needed.
    pub fn public_key(&self, identity: &KeyIdentity) -> Result<String, CryptoError> {
        let pair = self.resolve(identity)?;
        Ok(self.cipher.export_public_key(pair.public_key()))
    }

    /// Mint a one-time identity in this manager's namespace and create its
    /// key pair.
    pub fn create_ephemeral(&self) -> Result<(KeyIdentity, Arc<KeyPair>), CryptoError> {
        let identity = KeyIdentity::new(
            format!("{EPHEMERAL_PREFIX}{}", Uuid::new_v4()),
            &self.namespace,
        );
        let pair = self.claim_fresh(&identity)?;
        Ok((identity, pair))
    }

    /// Generate a pair for an identity that must not exist yet.
    fn claim_fresh(&self, identity: &KeyIdentity) -> Result<Arc<KeyPair>, CryptoError> {
        let slot = self.cache.slot(identity)?;
        let claimed = {
            let mut cached = slot.lock().map_err(|_| poisoned("key slot"))?;
            if cached.is_some() {
                return Err(in_use(identity));
            }
            self.create_unless_stored(identity).map(|pair| {
                let pair = Arc::new(pair);
                *cached = Some(Arc::clone(&pair));
                pair
            })
        };
        if claimed.is_err() {
            self.cache.release(identity, slot)?;
        }
        claimed
    }

    fn create_unless_stored(&self, identity: &KeyIdentity) -> Result<KeyPair, CryptoError> {
        if self.store.read(identity)?.is_some() {
            return Err(in_use(identity));
        }
        self.create_and_persist(identity)
    }

    /// Forget `identity`: drop its cached pair and delete the persisted
    /// secret. Meant for one-time keys once their handshake is over.
    ///
    /// The permanent identity cannot be retired. Returns whether a stored
    /// entry was deleted.
    pub fn retire(&self, identity: &KeyIdentity) -> Result<bool, CryptoError> {
        if *identity == self.permanent_identity() {
            return Err(CryptoError::KeyStore(format!(
                "refusing to retire permanent identity {identity}"
            )));
        }

        let slot = self.cache.slot(identity)?;
        let removed = {
            let mut cached = slot.lock().map_err(|_| poisoned("key slot"))?;
            let removed = self.store.remove(identity)?;
            *cached = None;
            removed
        };
        self.cache.release(identity, slot)?;
        tracing::info!(%identity, removed, "Retired key pair");
        Ok(removed)
    }

    fn load_or_create(&self, identity: &KeyIdentity) -> Result<KeyPair, CryptoError> {
        match self.store.read(identity)? {
            Some(secret) => {
                let pair = self.cipher.key_pair_from_secret(&secret)?;
                tracing::debug!(%identity, fingerprint = %pair.fingerprint(), "Loaded key pair from store");
                Ok(pair)
            }
            None => self.create_and_persist(identity),
        }
    }

    fn create_and_persist(&self, identity: &KeyIdentity) -> Result<KeyPair, CryptoError> {
        let pair = self.cipher.generate_key_pair()?;
        self.store
            .insert(identity, pair.secret_bytes().as_slice(), self.policy)?;
        tracing::info!(
            %identity,
            fingerprint = %pair.fingerprint(),
            policy = ?self.policy,
            "Generated and persisted new key pair"
        );
        Ok(pair)
    }
}
