//! Keyring master secrets and credential sealing.
//!
//! Each keyring generation has one random 32-byte master secret. A
//! credential is sealed under a key derived from the master secret and the
//! credential's own nonce, so every `(keyring, credential)` pair gets a
//! distinct key. Reusing a credential nonce under the same master secret is
//! a caller bug and panics.

use arcanum_core::{Credential, CredentialValue};
use rand::RngCore;
use std::collections::HashSet;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{SealNonce, SymmetricKey, NONCE_LEN, XCHACHA20POLY1305};
use crate::error::{PermsError, Result};

const CREDENTIAL_KEY_CONTEXT: &str = "arcanum credential key v1";

/// Length of a credential's key-derivation nonce.
pub const CREDENTIAL_NONCE_LEN: usize = 24;

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret {
    key: [u8; 32],
    #[zeroize(skip)]
    used_nonces: HashSet<[u8; CREDENTIAL_NONCE_LEN]>,
}

impl MasterSecret {
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::from_bytes(key)
    }

    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self {
            key,
            used_nonces: HashSet::new(),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PermsError::Decryption("master secret must be 32 bytes".into()))?;
        Ok(Self::from_bytes(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// A fresh random credential nonce.
    pub fn credential_nonce() -> [u8; CREDENTIAL_NONCE_LEN] {
        let mut nonce = [0u8; CREDENTIAL_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    fn credential_key(&self, credential_nonce: &[u8]) -> SymmetricKey {
        let mut hasher = blake3::Hasher::new_derive_key(CREDENTIAL_KEY_CONTEXT);
        hasher.update(&self.key);
        hasher.update(credential_nonce);
        SymmetricKey::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Seal a credential value.
    ///
    /// # Panics
    ///
    /// Panics if `credential_nonce` was already used with this master secret.
    pub fn encrypt_credential(
        &mut self,
        credential_nonce: &[u8; CREDENTIAL_NONCE_LEN],
        plaintext: &[u8],
    ) -> Result<CredentialValue> {
        assert!(
            self.used_nonces.insert(*credential_nonce),
            "credential nonce reused under the same keyring master secret"
        );

        let key = self.credential_key(credential_nonce);
        let nonce = SealNonce::generate();
        let value = key.seal(&nonce, plaintext, credential_nonce)?;
        Ok(CredentialValue {
            alg: XCHACHA20POLY1305.to_string(),
            nonce: nonce.as_bytes().to_vec(),
            value,
        })
    }

    /// Open the value of `credential`. Unset credentials yield `None`.
    pub fn decrypt_credential(&self, credential: &Credential) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let Some(value) = credential.credential.as_ref() else {
            return Ok(None);
        };
        if value.alg != XCHACHA20POLY1305 {
            return Err(PermsError::Decryption(format!(
                "unsupported credential algorithm: {}",
                value.alg
            )));
        }
        if value.nonce.len() != NONCE_LEN {
            return Err(PermsError::Decryption("malformed credential nonce".into()));
        }
        let key = self.credential_key(&credential.nonce);
        let nonce = SealNonce::from_slice(&value.nonce)?;
        key.open(&nonce, &value.value, &credential.nonce).map(Some)
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcanum_core::{Body, Identifier, Keyring, ObjectType, PathExp};

    fn credential(nonce: [u8; CREDENTIAL_NONCE_LEN], value: Option<CredentialValue>) -> Credential {
        let org = Identifier::derive(ObjectType::Org, b"acme");
        let project = Identifier::derive(ObjectType::Project, b"web");
        let pathexp = PathExp::new("acme", "web", "*", "*", "*", "*").unwrap();
        let keyring = Keyring::new(org, project, pathexp, None, 1, 0);
        let keyring_id = keyring.identifier().unwrap();
        Credential::new(keyring_id, &keyring, "DB_PASSWORD", nonce.to_vec(), value, None, 1)
    }

    #[test]
    fn test_credential_roundtrip() {
        let mut master = MasterSecret::generate();
        let nonce = MasterSecret::credential_nonce();
        let value = master.encrypt_credential(&nonce, b"s3cret").unwrap();
        let cred = credential(nonce, Some(value));

        let plaintext = master.decrypt_credential(&cred).unwrap().unwrap();
        assert_eq!(&plaintext[..], b"s3cret");
    }

    #[test]
    fn test_other_keyring_secret_fails() {
        let mut master = MasterSecret::generate();
        let nonce = MasterSecret::credential_nonce();
        let value = master.encrypt_credential(&nonce, b"s3cret").unwrap();
        let cred = credential(nonce, Some(value));

        let other = MasterSecret::generate();
        assert!(matches!(
            other.decrypt_credential(&cred),
            Err(PermsError::Decryption(_))
        ));
    }

    #[test]
    fn test_unset_credential_decrypts_to_none() {
        let master = MasterSecret::generate();
        let cred = credential(MasterSecret::credential_nonce(), None);
        assert!(master.decrypt_credential(&cred).unwrap().is_none());
    }

    #[test]
    fn test_swapped_nonce_fails() {
        let mut master = MasterSecret::generate();
        let nonce = MasterSecret::credential_nonce();
        let value = master.encrypt_credential(&nonce, b"s3cret").unwrap();
        let cred = credential(MasterSecret::credential_nonce(), Some(value));
        assert!(master.decrypt_credential(&cred).is_err());
    }

    #[test]
    #[should_panic(expected = "credential nonce reused")]
    fn test_nonce_reuse_panics() {
        let mut master = MasterSecret::generate();
        let nonce = MasterSecret::credential_nonce();
        master.encrypt_credential(&nonce, b"one").unwrap();
        let _ = master.encrypt_credential(&nonce, b"two");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_credential_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..256)) {
                let mut master = MasterSecret::generate();
                let nonce = MasterSecret::credential_nonce();
                let value = master.encrypt_credential(&nonce, &plaintext).unwrap();
                let cred = credential(nonce, Some(value));
                let opened = master.decrypt_credential(&cred).unwrap().unwrap();
                prop_assert_eq!(&opened[..], &plaintext[..]);
            }
        }
    }
}
