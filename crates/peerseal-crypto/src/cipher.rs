//! Cipher provider: key import/export, shared-key derivation and AEAD.
//!
//! [`CipherProvider`] is the seam the key manager and the confirmation-code
//! protocol consume. [`X25519Cipher`] is the shipped implementation:
//! X25519 ECDH → HKDF-SHA256 (caller salt) → ChaCha20-Poly1305.
//!
//! Sealed boxes are laid out as `nonce (12) || ciphertext || tag (16)`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::PublicKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::keypair::{KEY_SIZE, KeyPair};

/// HKDF info string for shared-key derivation. The salt carries the
/// per-purpose domain separation.
const HKDF_INFO: &[u8] = b"peerseal-shared-key-v1";

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

/// A 32-byte symmetric key derived from an ECDH exchange.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

impl SymmetricKey {
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Cryptographic primitives consumed by the handshake.
pub trait CipherProvider: Send + Sync {
    /// Generate a fresh key pair.
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;

    /// Rebuild a key pair from persisted secret bytes.
    fn key_pair_from_secret(&self, secret: &[u8]) -> Result<KeyPair, CryptoError> {
        KeyPair::from_secret_bytes(secret)
    }

    /// Export a public key to its textual form.
    fn export_public_key(&self, key: &PublicKey) -> String;

    /// Parse a public key from its textual form.
    fn import_public_key(&self, encoded: &str) -> Result<PublicKey, CryptoError>;

    /// Derive the symmetric key shared between `local` and `remote` under `salt`.
    fn derive_shared_key(
        &self,
        local: &KeyPair,
        remote: &PublicKey,
        salt: &[u8],
    ) -> Result<SymmetricKey, CryptoError>;

    /// Authenticated encryption of `plaintext`.
    fn seal(&self, key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Authenticated decryption. Fails closed on any tag mismatch.
    fn open(&self, key: &SymmetricKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// X25519 + HKDF-SHA256 + ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519Cipher;

impl CipherProvider for X25519Cipher {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        Ok(KeyPair::generate())
    }

    fn export_public_key(&self, key: &PublicKey) -> String {
        STANDARD.encode(key.as_bytes())
    }

    fn import_public_key(&self, encoded: &str) -> Result<PublicKey, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::KeyImport(format!("invalid base64: {e}")))?;
        let arr: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::KeyImport(format!(
                "expected {KEY_SIZE} key bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(PublicKey::from(arr))
    }

    fn derive_shared_key(
        &self,
        local: &KeyPair,
        remote: &PublicKey,
        salt: &[u8],
    ) -> Result<SymmetricKey, CryptoError> {
        let shared = local.diffie_hellman(remote);
        if !shared.was_contributory() {
            return Err(CryptoError::KeyDerivationFailed(
                "remote public key is a low-order point".into(),
            ));
        }
        let hk = Hkdf::<Sha256>::new(Some(salt), shared.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        let derived = SymmetricKey::from_bytes(key);
        key.zeroize();
        Ok(derived)
    }

    fn seal(&self, key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, key: &SymmetricKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed(format!(
                "sealed box too short: {} bytes",
                sealed.len()
            )));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}
