//! Cryptographic utilities for keyring distribution.
//!
//! Provides X25519 key agreement and XChaCha20-Poly1305 authenticated
//! encryption. Every type holding secret bytes zeroizes them on drop.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{PermsError, Result};

/// Algorithm name for X25519 encryption keys.
pub const CURVE25519: &str = "curve25519";

/// Algorithm name for XChaCha20-Poly1305 sealed values.
pub const XCHACHA20POLY1305: &str = "xchacha20poly1305";

/// Length of an XChaCha20-Poly1305 nonce.
pub const NONCE_LEN: usize = 24;

/// An X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            PermsError::InvalidKey(format!("x25519 public key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Pub({})", hex::encode(&self.0[..8]))
    }
}

/// An X25519 static secret. Only for key agreement, never for signing.
#[derive(Clone)]
pub struct X25519Secret(StaticSecret);

impl X25519Secret {
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::thread_rng()))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: Zeroizing<[u8; 32]> = Zeroizing::new(
            bytes
                .try_into()
                .map_err(|_| PermsError::InvalidKey("x25519 secret must be 32 bytes".into()))?,
        );
        Ok(Self(StaticSecret::from(*arr)))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.0.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes())
    }
}

impl fmt::Debug for X25519Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Secret({:?})", self.public_key())
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derive a wrapping key bound to `context`.
    pub fn derive_wrap_key(&self, context: &[u8]) -> SymmetricKey {
        let mut hasher = blake3::Hasher::new_derive_key("arcanum keyring-member wrap v1");
        hasher.update(&self.0);
        hasher.update(context);
        SymmetricKey(*hasher.finalize().as_bytes())
    }
}

/// A 256-bit XChaCha20-Poly1305 key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PermsError::InvalidKey("symmetric key must be 32 bytes".into()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn seal(&self, nonce: &SealNonce, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PermsError::Encryption(e.to_string()))?;
        cipher
            .encrypt(XNonce::from_slice(&nonce.0), Payload { msg: plaintext, aad })
            .map_err(|e| PermsError::Encryption(e.to_string()))
    }

    pub fn open(&self, nonce: &SealNonce, ciphertext: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PermsError::Decryption(e.to_string()))?;
        cipher
            .decrypt(XNonce::from_slice(&nonce.0), Payload { msg: ciphertext, aad })
            .map(Zeroizing::new)
            .map_err(|e| PermsError::Decryption(e.to_string()))
    }
}

/// A 192-bit XChaCha20-Poly1305 nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SealNonce(pub [u8; NONCE_LEN]);

impl SealNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; NONCE_LEN] = bytes.try_into().map_err(|_| {
            PermsError::Decryption(format!("nonce must be {} bytes, got {}", NONCE_LEN, bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub const fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

/// Ephemeral key pair for one-time key agreement.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Consumes the ephemeral secret (can only be used once).
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.secret.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_key_agreement() {
        let bob = X25519Secret::generate();
        let bob_public = bob.public_key();

        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let alice_shared = ephemeral.diffie_hellman(&bob_public);
        let bob_shared = bob.diffie_hellman(&ephemeral_public);

        assert_eq!(alice_shared.0, bob_shared.0);
    }

    #[test]
    fn test_seal_open() {
        let key = SymmetricKey::generate();
        let nonce = SealNonce::generate();
        let ciphertext = key.seal(&nonce, b"hunter2", b"ctx").unwrap();
        assert_ne!(&ciphertext[..], b"hunter2");

        let plaintext = key.open(&nonce, &ciphertext, b"ctx").unwrap();
        assert_eq!(&plaintext[..], b"hunter2");
    }

    #[test]
    fn test_open_with_wrong_aad_fails() {
        let key = SymmetricKey::generate();
        let nonce = SealNonce::generate();
        let ciphertext = key.seal(&nonce, b"hunter2", b"ctx-a").unwrap();
        assert!(matches!(
            key.open(&nonce, &ciphertext, b"ctx-b"),
            Err(PermsError::Decryption(_))
        ));
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let nonce = SealNonce::generate();
        let ciphertext = SymmetricKey::generate().seal(&nonce, b"x", b"").unwrap();
        assert!(SymmetricKey::generate().open(&nonce, &ciphertext, b"").is_err());
    }

    #[test]
    fn test_wrap_key_depends_on_context() {
        let shared = SharedKey([0x42; 32]);
        let a = shared.derive_wrap_key(b"keyring-a");
        let b = shared.derive_wrap_key(b"keyring-b");
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes(), shared.derive_wrap_key(b"keyring-a").as_bytes());
    }

    #[test]
    fn test_public_key_debug_shows_prefix() {
        let public = X25519PublicKey([0xab; 32]);
        assert_eq!(format!("{:?}", public), "X25519Pub(abababababababab)");
    }

    #[test]
    fn test_secret_roundtrip() {
        let secret = X25519Secret::generate();
        let restored = X25519Secret::from_slice(&secret.to_bytes()[..]).unwrap();
        assert_eq!(secret.public_key(), restored.public_key());
    }
}
