//! Confirmation-code protocol.
//!
//! The inviter generates a short numeric code and seals it under a key
//! derived from its private key, the invitee's public key and a salt. Only
//! the holder of the invitee's private key (or the inviter itself) can
//! recover the code. Both humans then compare the code out of band; a
//! man-in-the-middle who substituted a public key cannot produce a
//! ciphertext that opens to the same code on both sides.
//!
//! ```text
//! inviter (A)                                   invitee (B)
//!   code = random digits
//!   k = HKDF(salt, ECDH(A.priv, B.pub))
//!   C = base64(seal(k, code))  ─────── C, A.pub ───►
//!                                   k = HKDF(salt, ECDH(B.priv, A.pub))
//!                                   code = open(k, base64⁻¹(C))
//! ```

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::cipher::{CipherProvider, SymmetricKey, X25519Cipher};
use crate::codegen::{CodeGenerator, CodeRecipe, RandomCodeGenerator};
use crate::error::CryptoError;
use crate::keypair::KeyPair;

/// Salt used for confirmation-code key derivation unless configured
/// otherwise. Both peers must use the same value.
pub const DEFAULT_CONFIRM_CODE_SALT: [u8; 16] = *b"peerseal-confirm";

/// Number of digits in a confirmation code unless configured otherwise.
pub const DEFAULT_CODE_LENGTH: usize = 4;

/// Compare two strings without short-circuiting on the first mismatch.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// A plaintext confirmation code. Wiped from memory when dropped.
pub struct ConfirmationCode(Zeroizing<String>);

impl std::fmt::Debug for ConfirmationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConfirmationCode([REDACTED])")
    }
}

impl ConfirmationCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(Zeroizing::new(code.into()))
    }

    /// The code as shown to the user.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a code entered by the user.
    pub fn matches(&self, entered: &str) -> bool {
        constant_time_str_eq(&self.0, entered)
    }
}

/// Base64 text of a sealed confirmation code, safe to put in any message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedConfirmationCode(String);

impl EncryptedConfirmationCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for EncryptedConfirmationCode {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for EncryptedConfirmationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates, seals and opens confirmation codes.
pub struct ConfirmCodeProtocol {
    cipher: Arc<dyn CipherProvider>,
    generator: Arc<dyn CodeGenerator>,
    code_length: usize,
}

impl std::fmt::Debug for ConfirmCodeProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmCodeProtocol")
            .field("code_length", &self.code_length)
            .finish_non_exhaustive()
    }
}

impl Default for ConfirmCodeProtocol {
    fn default() -> Self {
        Self::new(
            Arc::new(X25519Cipher),
            Arc::new(RandomCodeGenerator),
            DEFAULT_CODE_LENGTH,
        )
    }
}

impl ConfirmCodeProtocol {
    pub fn new(
        cipher: Arc<dyn CipherProvider>,
        generator: Arc<dyn CodeGenerator>,
        code_length: usize,
    ) -> Self {
        Self {
            cipher,
            generator,
            code_length,
        }
    }

    pub const fn code_length(&self) -> usize {
        self.code_length
    }

    /// Recipe for codes produced by this protocol: digits only.
    pub const fn recipe(&self) -> CodeRecipe {
        CodeRecipe::digits(self.code_length)
    }

    /// Generate a fresh code and seal it for `remote_public_key`.
    ///
    /// Only the ciphertext is returned; the inviter recovers the plaintext
    /// for display with [`decrypt_code`](Self::decrypt_code).
    pub fn generate_encrypted_code(
        &self,
        remote_public_key: &str,
        local: &KeyPair,
        salt: &[u8],
    ) -> Result<EncryptedConfirmationCode, CryptoError> {
        let code = ConfirmationCode::new(self.generator.generate(&self.recipe())?);
        self.encrypt_code(&code, remote_public_key, local, salt)
    }

    /// Seal an existing code for `remote_public_key`.
    pub fn encrypt_code(
        &self,
        code: &ConfirmationCode,
        remote_public_key: &str,
        local: &KeyPair,
        salt: &[u8],
    ) -> Result<EncryptedConfirmationCode, CryptoError> {
        let key = self.shared_key(remote_public_key, local, salt)?;
        let sealed = self.cipher.seal(&key, code.as_str().as_bytes())?;
        tracing::debug!(
            local = %local.fingerprint(),
            sealed_len = sealed.len(),
            "Sealed confirmation code"
        );
        Ok(EncryptedConfirmationCode(STANDARD.encode(sealed)))
    }

    /// Open a sealed code received alongside `remote_public_key`.
    ///
    /// Fails with [`CryptoError::Decoding`] on malformed text and
    /// [`CryptoError::DecryptionFailed`] on any key, salt or integrity
    /// mismatch. Never returns unauthenticated plaintext.
    pub fn decrypt_code(
        &self,
        encrypted: &str,
        remote_public_key: &str,
        local: &KeyPair,
        salt: &[u8],
    ) -> Result<ConfirmationCode, CryptoError> {
        let sealed = STANDARD
            .decode(encrypted.trim())
            .map_err(|e| CryptoError::Decoding(format!("confirmation code is not base64: {e}")))?;
        let key = self.shared_key(remote_public_key, local, salt)?;
        let plaintext = Zeroizing::new(self.cipher.open(&key, &sealed).inspect_err(|e| {
            tracing::warn!(local = %local.fingerprint(), error = %e, "Confirmation code failed authentication");
        })?);

        let code = std::str::from_utf8(&plaintext).map_err(|_| {
            CryptoError::Decoding("confirmation code plaintext is not UTF-8".into())
        })?;
        Ok(ConfirmationCode::new(code))
    }

    fn shared_key(
        &self,
        remote_public_key: &str,
        local: &KeyPair,
        salt: &[u8],
    ) -> Result<SymmetricKey, CryptoError> {
        let remote = self.cipher.import_public_key(remote_public_key)?;
        self.cipher.derive_shared_key(local, &remote, salt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FixedCode(&'static str);

    impl CodeGenerator for FixedCode {
        fn generate(&self, _: &CodeRecipe) -> Result<String, CryptoError> {
            Ok(self.0.to_string())
        }
    }

    struct NoEntropy;

    impl CodeGenerator for NoEntropy {
        fn generate(&self, _: &CodeRecipe) -> Result<String, CryptoError> {
            Err(CryptoError::CodeGeneration("rng unavailable".into()))
        }
    }

    fn export(kp: &KeyPair) -> String {
        X25519Cipher.export_public_key(kp.public_key())
    }

    fn fixed(code: &'static str) -> ConfirmCodeProtocol {
        ConfirmCodeProtocol::new(Arc::new(X25519Cipher), Arc::new(FixedCode(code)), 4)
    }

    #[test]
    fn invitee_recovers_inviter_code() {
        let protocol = fixed("0427");
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let sealed = protocol
            .generate_encrypted_code(&export(&bob), &alice, &DEFAULT_CONFIRM_CODE_SALT)
            .unwrap();
        let opened = protocol
            .decrypt_code(sealed.as_str(), &export(&alice), &bob, &DEFAULT_CONFIRM_CODE_SALT)
            .unwrap();

        assert_eq!(opened.as_str(), "0427");
    }

    #[test]
    fn inviter_can_reopen_its_own_code() {
        let protocol = fixed("9031");
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let sealed = protocol
            .generate_encrypted_code(&export(&bob), &alice, &DEFAULT_CONFIRM_CODE_SALT)
            .unwrap();
        let opened = protocol
            .decrypt_code(sealed.as_str(), &export(&bob), &alice, &DEFAULT_CONFIRM_CODE_SALT)
            .unwrap();
        assert_eq!(opened.as_str(), "9031");
    }

    #[test]
    fn default_protocol_generates_four_digits() {
        let protocol = ConfirmCodeProtocol::default();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let sealed = protocol
            .generate_encrypted_code(&export(&bob), &alice, &DEFAULT_CONFIRM_CODE_SALT)
            .unwrap();
        let opened = protocol
            .decrypt_code(sealed.as_str(), &export(&alice), &bob, &DEFAULT_CONFIRM_CODE_SALT)
            .unwrap();

        assert_eq!(opened.as_str().len(), DEFAULT_CODE_LENGTH);
        assert!(opened.as_str().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn ciphertext_does_not_contain_code() {
        let protocol = fixed("5555");
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let sealed = protocol
            .generate_encrypted_code(&export(&bob), &alice, &DEFAULT_CONFIRM_CODE_SALT)
            .unwrap();
        let raw = STANDARD.decode(sealed.as_str()).unwrap();
        assert!(!raw.windows(4).any(|w| w == b"5555"));
    }

    #[test]
    fn generator_failure_is_surfaced() {
        let protocol =
            ConfirmCodeProtocol::new(Arc::new(X25519Cipher), Arc::new(NoEntropy), 4);
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let result =
            protocol.generate_encrypted_code(&export(&bob), &alice, &DEFAULT_CONFIRM_CODE_SALT);
        assert!(matches!(result, Err(CryptoError::CodeGeneration(_))));
    }

    #[test]
    fn malformed_remote_key_is_import_error() {
        let protocol = fixed("1234");
        let alice = KeyPair::generate();
        let result =
            protocol.generate_encrypted_code("%%%", &alice, &DEFAULT_CONFIRM_CODE_SALT);
        assert!(matches!(result, Err(CryptoError::KeyImport(_))));
    }

    #[test]
    fn non_base64_ciphertext_is_decoding_error() {
        let protocol = fixed("1234");
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let result = protocol.decrypt_code(
            "this is not base64!",
            &export(&alice),
            &bob,
            &DEFAULT_CONFIRM_CODE_SALT,
        );
        assert!(matches!(result, Err(CryptoError::Decoding(_))));
    }

    #[test]
    fn non_utf8_plaintext_is_decoding_error() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let key = X25519Cipher
            .derive_shared_key(&alice, bob.public_key(), &DEFAULT_CONFIRM_CODE_SALT)
            .unwrap();
        let sealed = STANDARD.encode(X25519Cipher.seal(&key, &[0xff, 0xfe]).unwrap());

        let result = fixed("0000").decrypt_code(
            &sealed,
            &export(&alice),
            &bob,
            &DEFAULT_CONFIRM_CODE_SALT,
        );
        assert!(matches!(result, Err(CryptoError::Decoding(_))));
    }

    #[test]
    fn constant_time_eq_behaves_like_eq() {
        assert!(constant_time_str_eq("1234", "1234"));
        assert!(!constant_time_str_eq("1234", "1235"));
        assert!(!constant_time_str_eq("1234", "12345"));
        assert!(constant_time_str_eq("", ""));
    }

    #[test]
    fn confirmation_code_matches_and_redacts() {
        let code = ConfirmationCode::new("8080");
        assert!(code.matches("8080"));
        assert!(!code.matches("8081"));
        assert!(!format!("{code:?}").contains("8080"));
    }
}
