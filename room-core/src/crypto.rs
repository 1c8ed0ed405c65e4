//! Mesh session crypto: ephemeral X25519 keypairs, directional session keys, wire encryption.

use chacha20poly1305::aead::{Aead, KeyInit};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// X25519 public key (32 bytes). Carried in the invite handshake.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "bytes_32")] [u8; 32]);

mod bytes_32 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }
}

/// Per-process keypair. Not persisted; a restart means a new key.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn shared_secret(&self, other_public: &PublicKey) -> [u8; 32] {
        let other = X25519PublicKey::from(other_public.0);
        self.secret.diffie_hellman(&other).to_bytes()
    }
}

/// One key per direction so both ends can count nonces from zero.
#[derive(Clone)]
pub struct SessionKeys {
    pub send: [u8; 32],
    pub recv: [u8; 32],
}

/// Derive directional keys for one session. `initiator` is the side that sent the invite.
pub fn derive_session_keys(
    shared_secret: &[u8; 32],
    initiator: &PublicKey,
    acceptor: &PublicKey,
    we_initiated: bool,
) -> SessionKeys {
    let to_acceptor = directional_key(shared_secret, initiator, acceptor);
    let to_initiator = directional_key(shared_secret, acceptor, initiator);
    if we_initiated {
        SessionKeys {
            send: to_acceptor,
            recv: to_initiator,
        }
    } else {
        SessionKeys {
            send: to_initiator,
            recv: to_acceptor,
        }
    }
}

fn directional_key(shared_secret: &[u8; 32], from: &PublicKey, to: &PublicKey) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"roomdetect-session-v1");
    hasher.update(shared_secret);
    hasher.update(from.as_bytes());
    hasher.update(to.as_bytes());
    hasher.finalize().into()
}

/// Poly1305 tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// ChaCha20-Poly1305. Nonce: 64-bit counter per direction; never reuse.
pub fn encrypt_wire(
    key: &[u8; 32],
    nonce: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, WireCryptoError> {
    let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WireCryptoError::Key)?;
    let nonce_bytes = nonce_bytes(nonce);
    let nonce_arr = chacha20poly1305::aead::Nonce::<chacha20poly1305::ChaCha20Poly1305>::from_slice(
        &nonce_bytes,
    );
    cipher
        .encrypt(nonce_arr, plaintext)
        .map_err(|_| WireCryptoError::Encrypt)
}

pub fn decrypt_wire(
    key: &[u8; 32],
    nonce: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, WireCryptoError> {
    let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WireCryptoError::Key)?;
    let nonce_bytes = nonce_bytes(nonce);
    let nonce_arr = chacha20poly1305::aead::Nonce::<chacha20poly1305::ChaCha20Poly1305>::from_slice(
        &nonce_bytes,
    );
    cipher
        .decrypt(nonce_arr, ciphertext)
        .map_err(|_| WireCryptoError::Decrypt)
}

fn nonce_bytes(nonce: u64) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[4..12].copy_from_slice(&nonce.to_le_bytes());
    out
}

#[derive(Debug, thiserror::Error)]
pub enum WireCryptoError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}
