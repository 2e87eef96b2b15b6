//! Crypto error types.

/// Errors from key management and the confirmation-code handshake.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Public key import failed: {0}")]
    KeyImport(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Decoding failed: {0}")]
    Decoding(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Confirmation code generation failed: {0}")]
    CodeGeneration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] peerseal_core::Error),
}
