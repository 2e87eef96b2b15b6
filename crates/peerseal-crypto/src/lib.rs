//! `PeerSeal` E2E Bootstrap Library
//!
//! Establishes an authenticated end-to-end channel between two peers with
//! a short human-comparable confirmation code.
//!
//! ## Components
//!
//! - **Key manager**: cache → secure store → generate-and-persist, one
//!   X25519 key pair per identity
//! - **Confirmation code**: random digits sealed with ChaCha20-Poly1305
//!   under HKDF-SHA256(salt, X25519 ECDH)
//! - **Invites**: permanent (stable key) and ephemeral (one-time key)
//!   variants sharing one protocol implementation

pub mod cipher;
pub mod codegen;
pub mod confirm;
pub mod e2ee;
pub mod error;
pub mod invite;
pub mod key_manager;
pub mod keypair;
pub mod store;

pub use cipher::{CipherProvider, NONCE_SIZE, SymmetricKey, TAG_SIZE, X25519Cipher};
pub use codegen::{CodeGenerator, CodeRecipe, RandomCodeGenerator};
pub use confirm::{
    ConfirmCodeProtocol, ConfirmationCode, DEFAULT_CODE_LENGTH, DEFAULT_CONFIRM_CODE_SALT,
    EncryptedConfirmationCode, constant_time_str_eq,
};
pub use e2ee::E2ee;
pub use error::CryptoError;
pub use invite::{EphemeralInvite, InviteKind, PermanentInvite};
pub use key_manager::{KeyCache, KeyManager};
pub use keypair::{KEY_SIZE, KeyPair, fingerprint_of};
pub use store::{AccessPolicy, FileKeyStore, KeyIdentity, MemoryKeyStore, SecureKeyStore};
