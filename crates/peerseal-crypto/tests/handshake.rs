#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end confirmation-code handshake between two peers.
//!
//! Alice invites Bob; Bob recovers the code; failure paths must surface
//! errors instead of plausible plaintext.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use peerseal_core::{Config, KeyStoreBackend};
use peerseal_crypto::{
    CipherProvider, ConfirmCodeProtocol, CryptoError, E2ee, EphemeralInvite, InviteKind, KeyCache,
    KeyIdentity, KeyManager, KeyPair, MemoryKeyStore, PermanentInvite, SecureKeyStore,
    X25519Cipher,
};

/// Fixed 16-byte salt shared by both peers.
const SALT: [u8; 16] = *b"0123456789abcdef";

struct Peer {
    pair: KeyPair,
    public: String,
}

impl Peer {
    fn new() -> Self {
        let pair = KeyPair::generate();
        let public = X25519Cipher.export_public_key(pair.public_key());
        Self { pair, public }
    }
}

fn alice_sends_code_to_bob() -> (Peer, Peer, String) {
    let alice = Peer::new();
    let bob = Peer::new();
    let sealed = ConfirmCodeProtocol::default()
        .generate_encrypted_code(&bob.public, &alice.pair, &SALT)
        .unwrap()
        .into_string();
    (alice, bob, sealed)
}

#[test]
fn bob_recovers_the_code_alice_generated() {
    let protocol = ConfirmCodeProtocol::default();
    let (alice, bob, sealed) = alice_sends_code_to_bob();

    let alice_view = protocol
        .decrypt_code(&sealed, &bob.public, &alice.pair, &SALT)
        .unwrap();
    let bob_view = protocol
        .decrypt_code(&sealed, &alice.public, &bob.pair, &SALT)
        .unwrap();

    assert_eq!(bob_view.as_str(), alice_view.as_str());
    assert_eq!(bob_view.as_str().len(), 4);
    assert!(bob_view.as_str().chars().all(|c| c.is_ascii_digit()));
    assert!(bob_view.matches(alice_view.as_str()));
}

#[test]
fn bob_using_his_own_public_key_is_rejected() {
    let (_alice, bob, sealed) = alice_sends_code_to_bob();
    let result = ConfirmCodeProtocol::default().decrypt_code(&sealed, &bob.public, &bob.pair, &SALT);
    assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
}

#[test]
fn third_party_cannot_open_the_code() {
    let (alice, _bob, sealed) = alice_sends_code_to_bob();
    let mallory = Peer::new();
    let result =
        ConfirmCodeProtocol::default().decrypt_code(&sealed, &alice.public, &mallory.pair, &SALT);
    assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
}

#[test]
fn flipping_any_byte_is_detected() {
    let protocol = ConfirmCodeProtocol::default();
    let (alice, bob, sealed) = alice_sends_code_to_bob();
    let raw = STANDARD.decode(&sealed).unwrap();

    for i in 0..raw.len() {
        let mut tampered = raw.clone();
        tampered[i] ^= 0x80;
        let result = protocol.decrypt_code(
            &STANDARD.encode(&tampered),
            &alice.public,
            &bob.pair,
            &SALT,
        );
        assert!(
            matches!(result, Err(CryptoError::DecryptionFailed(_))),
            "tampering byte {i} was not detected"
        );
    }
}

#[test]
fn truncated_ciphertext_is_rejected() {
    let (alice, bob, sealed) = alice_sends_code_to_bob();
    let raw = STANDARD.decode(&sealed).unwrap();
    let truncated = STANDARD.encode(&raw[..raw.len() - 1]);
    let result =
        ConfirmCodeProtocol::default().decrypt_code(&truncated, &alice.public, &bob.pair, &SALT);
    assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
}

#[test]
fn different_salt_fails_decryption() {
    let (alice, bob, sealed) = alice_sends_code_to_bob();
    let result = ConfirmCodeProtocol::default().decrypt_code(
        &sealed,
        &alice.public,
        &bob.pair,
        b"fedcba9876543210",
    );
    assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
}

#[test]
fn non_base64_ciphertext_is_a_decoding_error() {
    let (alice, bob, _) = alice_sends_code_to_bob();
    let result = ConfirmCodeProtocol::default().decrypt_code(
        "~~ definitely not base64 ~~",
        &alice.public,
        &bob.pair,
        &SALT,
    );
    assert!(matches!(result, Err(CryptoError::Decoding(_))));
}

#[test]
fn malformed_remote_key_is_an_import_error() {
    let (_alice, bob, sealed) = alice_sends_code_to_bob();
    let result =
        ConfirmCodeProtocol::default().decrypt_code(&sealed, "c2hvcnQ=", &bob.pair, &SALT);
    assert!(matches!(result, Err(CryptoError::KeyImport(_))));
}

#[test]
fn round_trip_holds_for_many_fresh_pairs() {
    let protocol = ConfirmCodeProtocol::default();
    for _ in 0..32 {
        let (alice, bob, sealed) = alice_sends_code_to_bob();
        let a = protocol
            .decrypt_code(&sealed, &bob.public, &alice.pair, &SALT)
            .unwrap();
        let b = protocol
            .decrypt_code(&sealed, &alice.public, &bob.pair, &SALT)
            .unwrap();
        assert_eq!(a.as_str(), b.as_str());
    }
}

#[test]
fn permanent_invite_between_two_configured_peers() {
    let mut config = Config::default();
    config.keys.store = KeyStoreBackend::Memory;
    let alice = E2ee::from_config(&config).unwrap();
    let bob = E2ee::from_config(&config).unwrap();

    let bob_pub = bob.permanent_public_key().unwrap();
    let invite = PermanentInvite::issue(&alice, &bob_pub, alice.salt()).unwrap();
    let shown_to_alice = invite
        .decrypted_confirm_code(&alice, &bob_pub, alice.salt())
        .unwrap();

    let wire = serde_json::to_string(&invite).unwrap();
    let received: PermanentInvite = serde_json::from_str(&wire).unwrap();
    let shown_to_bob = received.confirmation_code(&bob, bob.salt()).unwrap();

    assert_eq!(shown_to_alice.as_str(), shown_to_bob.as_str());
}

#[test]
fn ephemeral_invite_between_two_peers() {
    let alice = E2ee::in_memory();
    let bob = E2ee::in_memory();

    let (bob_key, bob_pub) = EphemeralInvite::prepare(&bob).unwrap();
    let invite = EphemeralInvite::issue(&alice, &bob_pub, alice.salt()).unwrap();
    let shown_to_alice = invite
        .decrypted_confirm_code(&alice, &bob_pub, alice.salt())
        .unwrap();

    let wire = serde_json::to_string(&invite).unwrap();
    let received: EphemeralInvite = serde_json::from_str(&wire).unwrap();
    let shown_to_bob = received
        .with_local_key(bob_key)
        .confirmation_code(&bob, bob.salt())
        .unwrap();

    assert_eq!(shown_to_alice.as_str(), shown_to_bob.as_str());
}

#[test]
fn invite_decrypted_with_swapped_roles_fails_closed() {
    let alice = E2ee::in_memory();
    let bob = E2ee::in_memory();
    let bob_pub = bob.permanent_public_key().unwrap();
    let invite = PermanentInvite::issue(&alice, &bob_pub, alice.salt()).unwrap();

    // Bob passes his own key where Alice's belongs.
    let result = invite.decrypted_confirm_code(&bob, &bob_pub, bob.salt());
    assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
}

#[test]
fn key_survives_process_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.keys.store_dir = Some(dir.path().join("keys"));

    let before = {
        let e2ee = E2ee::from_config(&config).unwrap();
        e2ee.keys()
            .resolve(&e2ee.keys().permanent_identity())
            .unwrap()
            .public_bytes()
    };

    let restarted = E2ee::from_config(&config).unwrap();
    let identity = restarted.keys().permanent_identity();
    assert!(!restarted.keys().cache().contains(&identity).unwrap());
    let after = restarted.keys().resolve(&identity).unwrap().public_bytes();

    assert_eq!(before, after);
}

#[test]
fn invite_issued_before_restart_still_opens_after() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.keys.store_dir = Some(dir.path().to_path_buf());
    config.keys.namespace = "bob-device".into();

    let bob_pub = E2ee::from_config(&config)
        .unwrap()
        .permanent_public_key()
        .unwrap();

    let alice = E2ee::in_memory();
    let invite = PermanentInvite::issue(&alice, &bob_pub, alice.salt()).unwrap();
    let expected = invite
        .decrypted_confirm_code(&alice, &bob_pub, alice.salt())
        .unwrap();

    let bob_after_restart = E2ee::from_config(&config).unwrap();
    let received = PermanentInvite::new(invite.confirm_code().clone(), invite.ext_pub_key());
    let code = received
        .confirmation_code(&bob_after_restart, bob_after_restart.salt())
        .unwrap();
    assert_eq!(code.as_str(), expected.as_str());
}

#[test]
fn concurrent_resolution_across_threads_yields_one_key() {
    let store: Arc<dyn SecureKeyStore> = Arc::new(MemoryKeyStore::new());
    let keys = Arc::new(KeyManager::new(
        Arc::new(X25519Cipher),
        Arc::clone(&store),
        KeyCache::new(),
        &Config::default().keys,
    ));
    let identity = KeyIdentity::new("shared", "concurrency");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let keys = Arc::clone(&keys);
            let identity = identity.clone();
            std::thread::spawn(move || keys.resolve(&identity).unwrap().public_bytes())
        })
        .collect();
    let publics: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(publics.windows(2).all(|w| w[0] == w[1]));
    let stored = store.read(&identity).unwrap().unwrap();
    let rebuilt = KeyPair::from_secret_bytes(&stored).unwrap();
    assert_eq!(rebuilt.public_bytes(), publics[0]);
}
