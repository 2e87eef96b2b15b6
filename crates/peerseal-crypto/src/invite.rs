//! Invites: the confirmation code plus the sender's public key.
//!
//! Two kinds share one protocol implementation through [`InviteKind`]'s
//! provided methods and differ only in how the local key pair is found:
//!
//! - [`PermanentInvite`]: the manager's stable permanent identity, reused
//!   across every invite from this peer.
//! - [`EphemeralInvite`]: a one-time identity minted per issued invite.
//!
//! ## Handshake
//! ```text
//! Uninitiated → CodeGenerated (inviter: issue)
//!             → CodeTransmitted (out of scope)
//!             → CodeDecrypted (invitee: confirmation_code)
//!             → Verified (humans compare codes)
//! ```
//!
//! Only `confirmCode` and `extPubKey` are serialized. The local key binding
//! never leaves the process.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::confirm::{ConfirmationCode, EncryptedConfirmationCode};
use crate::e2ee::E2ee;
use crate::error::CryptoError;
use crate::keypair::KeyPair;
use crate::store::KeyIdentity;

/// Behaviour shared by every invite kind.
pub trait InviteKind {
    /// Sealed confirmation code carried by the invite.
    fn confirm_code(&self) -> &EncryptedConfirmationCode;

    /// Exported public key of the peer that issued the invite.
    fn ext_pub_key(&self) -> &str;

    /// Identity of this side's key pair for this invite.
    fn local_identity(&self, e2ee: &E2ee) -> Result<KeyIdentity, CryptoError>;

    /// Identity a newly issued invite of this kind should use.
    fn issuing_identity(e2ee: &E2ee) -> Result<KeyIdentity, CryptoError>
    where
        Self: Sized;

    /// Build an invite from its parts.
    fn assemble(
        confirm_code: EncryptedConfirmationCode,
        ext_pub_key: String,
        local: KeyIdentity,
    ) -> Self
    where
        Self: Sized;

    /// This side's key pair for the invite.
    fn key_pair(&self, e2ee: &E2ee) -> Result<Arc<KeyPair>, CryptoError> {
        e2ee.keys().resolve(&self.local_identity(e2ee)?)
    }

    /// Inviter side: seal a fresh code for `remote_pub_key` and wrap it
    /// together with our exported public key.
    fn issue(e2ee: &E2ee, remote_pub_key: &str, salt: &[u8]) -> Result<Self, CryptoError>
    where
        Self: Sized,
    {
        let identity = Self::issuing_identity(e2ee)?;
        let pair = e2ee.keys().resolve(&identity)?;
        let confirm_code = e2ee
            .codes()
            .generate_encrypted_code(remote_pub_key, &pair, salt)?;
        let ext_pub_key = e2ee.keys().cipher().export_public_key(pair.public_key());
        tracing::info!(%identity, "Issued invite");
        Ok(Self::assemble(confirm_code, ext_pub_key, identity))
    }

    /// Inviter side: seal a new code for `remote_pub_key` with our key pair.
    fn encrypted_confirm_code(
        &self,
        e2ee: &E2ee,
        remote_pub_key: &str,
        salt: &[u8],
    ) -> Result<EncryptedConfirmationCode, CryptoError> {
        let pair = self.key_pair(e2ee)?;
        e2ee.codes()
            .generate_encrypted_code(remote_pub_key, &pair, salt)
    }

    /// Open this invite's code against `remote_pub_key` with our key pair.
    ///
    /// The invitee passes the inviter's key ([`ext_pub_key`](Self::ext_pub_key));
    /// the inviter passes the invitee's key. Swapping them fails with
    /// [`CryptoError::DecryptionFailed`].
    fn decrypted_confirm_code(
        &self,
        e2ee: &E2ee,
        remote_pub_key: &str,
        salt: &[u8],
    ) -> Result<ConfirmationCode, CryptoError> {
        let pair = self.key_pair(e2ee)?;
        e2ee.codes()
            .decrypt_code(self.confirm_code().as_str(), remote_pub_key, &pair, salt)
    }

    /// Invitee side: open the code using the key carried in the invite.
    fn confirmation_code(&self, e2ee: &E2ee, salt: &[u8]) -> Result<ConfirmationCode, CryptoError> {
        self.decrypted_confirm_code(e2ee, self.ext_pub_key(), salt)
    }
}

/// Invite backed by the long-lived permanent key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermanentInvite {
    confirm_code: EncryptedConfirmationCode,
    ext_pub_key: String,
    #[serde(skip)]
    local: Option<KeyIdentity>,
}

impl PermanentInvite {
    /// Wrap a received invite. Decrypts with the manager's permanent key.
    pub fn new(confirm_code: EncryptedConfirmationCode, ext_pub_key: impl Into<String>) -> Self {
        Self {
            confirm_code,
            ext_pub_key: ext_pub_key.into(),
            local: None,
        }
    }
}

impl InviteKind for PermanentInvite {
    fn confirm_code(&self) -> &EncryptedConfirmationCode {
        &self.confirm_code
    }

    fn ext_pub_key(&self) -> &str {
        &self.ext_pub_key
    }

    fn local_identity(&self, e2ee: &E2ee) -> Result<KeyIdentity, CryptoError> {
        Ok(self
            .local
            .clone()
            .unwrap_or_else(|| e2ee.keys().permanent_identity()))
    }

    fn issuing_identity(e2ee: &E2ee) -> Result<KeyIdentity, CryptoError> {
        Ok(e2ee.keys().permanent_identity())
    }

    fn assemble(
        confirm_code: EncryptedConfirmationCode,
        ext_pub_key: String,
        local: KeyIdentity,
    ) -> Self {
        Self {
            confirm_code,
            ext_pub_key,
            local: Some(local),
        }
    }
}

/// Invite backed by a one-time key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralInvite {
    confirm_code: EncryptedConfirmationCode,
    ext_pub_key: String,
    #[serde(skip)]
    local: Option<KeyIdentity>,
}

impl EphemeralInvite {
    /// Wrap a received invite. Bind it with [`with_local_key`](Self::with_local_key)
    /// before decrypting.
    pub fn new(confirm_code: EncryptedConfirmationCode, ext_pub_key: impl Into<String>) -> Self {
        Self {
            confirm_code,
            ext_pub_key: ext_pub_key.into(),
            local: None,
        }
    }

    /// Invitee side: mint the one-time key pair the inviter will seal to.
    /// Returns the identity to bind later and the public key to send.
    pub fn prepare(e2ee: &E2ee) -> Result<(KeyIdentity, String), CryptoError> {
        let (identity, pair) = e2ee.keys().create_ephemeral()?;
        let public = e2ee.keys().cipher().export_public_key(pair.public_key());
        Ok((identity, public))
    }

    /// Bind the one-time identity created by [`prepare`](Self::prepare).
    #[must_use]
    pub fn with_local_key(mut self, identity: KeyIdentity) -> Self {
        self.local = Some(identity);
        self
    }

    /// Delete this invite's one-time key pair once the codes have been
    /// compared. The invite cannot be opened afterwards.
    pub fn retire(&self, e2ee: &E2ee) -> Result<bool, CryptoError> {
        e2ee.keys().retire(&self.local_identity(e2ee)?)
    }
}

impl InviteKind for EphemeralInvite {
    fn confirm_code(&self) -> &EncryptedConfirmationCode {
        &self.confirm_code
    }

    fn ext_pub_key(&self) -> &str {
        &self.ext_pub_key
    }

    fn local_identity(&self, _e2ee: &E2ee) -> Result<KeyIdentity, CryptoError> {
        self.local.clone().ok_or_else(|| {
            CryptoError::KeyStore("ephemeral invite has no local key bound".into())
        })
    }

    fn issuing_identity(e2ee: &E2ee) -> Result<KeyIdentity, CryptoError> {
        let (identity, _) = e2ee.keys().create_ephemeral()?;
        Ok(identity)
    }

    fn assemble(
        confirm_code: EncryptedConfirmationCode,
        ext_pub_key: String,
        local: KeyIdentity,
    ) -> Self {
        Self {
            confirm_code,
            ext_pub_key,
            local: Some(local),
        }
    }
}
