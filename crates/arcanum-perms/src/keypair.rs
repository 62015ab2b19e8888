//! Principal keypairs.
//!
//! Every principal in an org holds two keypairs:
//!
//! - a **signing** key (Ed25519), whose public half is self-signed
//! - an **encryption** key (X25519), whose public half is signed by the
//!   signing key
//!
//! Both private halves are sealed under a caller-supplied key-encryption
//! key before they are wrapped in a `PrivateKey` object, and each public key
//! starts its claim chain with a `signature` claim.

use arcanum_core::{
    is_revoked, Claim, ClaimType, Envelope, Identifier, KeyType, PrivateKey,
    PrivateKeyValue, PublicKey, SigningKeypair, Timestamp, EDDSA,
};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{SealNonce, SymmetricKey, X25519PublicKey, X25519Secret, CURVE25519, XCHACHA20POLY1305};
use crate::error::{PermsError, Result};

/// Caller-held key that seals private keys at rest.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey([u8; 32]);

impl KeyEncryptionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        Self(*SymmetricKey::generate().as_bytes())
    }

    /// Derive from a passphrase-derived secret or another master value.
    pub fn derive(context: &str, material: &[u8]) -> Self {
        Self(blake3::derive_key(context, material))
    }

    fn cipher(&self) -> SymmetricKey {
        SymmetricKey::from_bytes(self.0)
    }

    fn seal(&self, public_key_id: &Identifier, secret: &[u8]) -> Result<(PrivateKeyValue, Vec<u8>)> {
        let nonce = SealNonce::generate();
        let value = self.cipher().seal(&nonce, secret, public_key_id.as_bytes())?;
        Ok((
            PrivateKeyValue {
                alg: XCHACHA20POLY1305.to_string(),
                value,
            },
            nonce.as_bytes().to_vec(),
        ))
    }

    /// Recover the raw private key bytes of `private`.
    pub fn unseal(&self, private: &PrivateKey) -> Result<Zeroizing<Vec<u8>>> {
        if private.key.alg != XCHACHA20POLY1305 {
            return Err(PermsError::Decryption(format!(
                "unsupported private key algorithm: {}",
                private.key.alg
            )));
        }
        let nonce = SealNonce::from_slice(&private.pnonce)?;
        self.cipher()
            .open(&nonce, &private.key.value, private.public_key_id.as_bytes())
    }
}

impl fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyEncryptionKey(..)")
    }
}

/// A principal's unsealed key material, with the identifiers of the public
/// key objects it corresponds to.
#[derive(Clone)]
pub struct PrincipalKeys {
    pub org_id: Identifier,
    pub owner_id: Identifier,
    pub signing_key_id: Identifier,
    pub signing: SigningKeypair,
    pub encryption_key_id: Identifier,
    pub encryption: X25519Secret,
}

impl PrincipalKeys {
    pub fn encryption_public(&self) -> X25519PublicKey {
        self.encryption.public_key()
    }

    /// Restore from stored key objects, unsealing both private halves.
    pub fn unseal(
        kek: &KeyEncryptionKey,
        signing_private: &PrivateKey,
        encryption_private: &PrivateKey,
    ) -> Result<Self> {
        let signing_bytes = kek.unseal(signing_private)?;
        let encryption_bytes = kek.unseal(encryption_private)?;
        Ok(Self {
            org_id: signing_private.org_id,
            owner_id: signing_private.owner_id,
            signing_key_id: signing_private.public_key_id,
            signing: SigningKeypair::from_slice(&signing_bytes)?,
            encryption_key_id: encryption_private.public_key_id,
            encryption: X25519Secret::from_slice(&encryption_bytes)?,
        })
    }
}

impl fmt::Debug for PrincipalKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrincipalKeys")
            .field("owner_id", &self.owner_id)
            .field("signing_key_id", &self.signing_key_id)
            .field("encryption_key_id", &self.encryption_key_id)
            .finish()
    }
}

/// A public key with its private half and claim chain, as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeypairResult {
    pub public_key: Envelope,
    pub private_key: Envelope,
    pub claims: Vec<Envelope>,
}

impl KeypairResult {
    pub fn public_key_body(&self) -> Result<PublicKey> {
        Ok(self.public_key.body_as()?)
    }

    pub fn key_type(&self) -> Result<KeyType> {
        Ok(self.public_key_body()?.key_type)
    }

    /// Whether any claim against this key is a revocation.
    pub fn revoked(&self) -> bool {
        let claims: Vec<Claim> = self
            .claims
            .iter()
            .filter_map(|env| env.body_as::<Claim>().ok())
            .collect();
        is_revoked(&self.public_key.id, &claims)
    }
}

/// Both keypairs of a freshly generated principal.
#[derive(Debug)]
pub struct GeneratedKeypairs {
    pub keys: PrincipalKeys,
    pub signing: KeypairResult,
    pub encryption: KeypairResult,
}

/// Generate and sign a signing and an encryption keypair for `owner_id`.
pub fn generate_keypairs(
    org_id: Identifier,
    owner_id: Identifier,
    kek: &KeyEncryptionKey,
    now: Timestamp,
    lifetime_ms: i64,
) -> Result<GeneratedKeypairs> {
    let expires_at = now.saturating_add(lifetime_ms);

    let signing = SigningKeypair::generate();
    let signing_public = PublicKey::new(
        org_id,
        owner_id,
        KeyType::Signing,
        EDDSA,
        signing.public_key().as_bytes().to_vec(),
        now,
        expires_at,
    );
    let signing_public_env = Envelope::seal(signing_public, &signing, None)?;
    let signing_key_id = signing_public_env.id;

    let encryption = X25519Secret::generate();
    let encryption_public = PublicKey::new(
        org_id,
        owner_id,
        KeyType::Encryption,
        CURVE25519,
        encryption.public_key().as_bytes().to_vec(),
        now,
        expires_at,
    );
    let encryption_public_env = Envelope::seal(encryption_public, &signing, Some(signing_key_id))?;
    let encryption_key_id = encryption_public_env.id;

    let seal_private = |public_key_id: Identifier, secret: &[u8]| -> Result<Envelope> {
        let (key, pnonce) = kek.seal(&public_key_id, secret)?;
        let private = PrivateKey::new(org_id, owner_id, public_key_id, key, pnonce);
        Ok(Envelope::seal(private, &signing, Some(signing_key_id))?)
    };
    let signing_private_env = seal_private(signing_key_id, &signing.seed()[..])?;
    let encryption_private_env = seal_private(encryption_key_id, &encryption.to_bytes()[..])?;

    let initial_claim = |public_key_id: Identifier| -> Result<Envelope> {
        let claim = Claim::at(org_id, owner_id, None, public_key_id, ClaimType::Signature, now);
        Ok(Envelope::seal(claim, &signing, Some(signing_key_id))?)
    };
    let signing_claim = initial_claim(signing_key_id)?;
    let encryption_claim = initial_claim(encryption_key_id)?;

    tracing::debug!(
        owner_id = %owner_id,
        signing_key_id = %signing_key_id,
        encryption_key_id = %encryption_key_id,
        "generated principal keypairs"
    );

    Ok(GeneratedKeypairs {
        keys: PrincipalKeys {
            org_id,
            owner_id,
            signing_key_id,
            signing,
            encryption_key_id,
            encryption,
        },
        signing: KeypairResult {
            public_key: signing_public_env,
            private_key: signing_private_env,
            claims: vec![signing_claim],
        },
        encryption: KeypairResult {
            public_key: encryption_public_env,
            private_key: encryption_private_env,
            claims: vec![encryption_claim],
        },
    })
}

/// Check that `public_key` may be used to receive wrapped secrets.
pub fn encryption_recipient(public_key_id: &Identifier, public_key: &PublicKey) -> Result<X25519PublicKey> {
    if public_key.key_type != KeyType::Encryption || public_key.alg != CURVE25519 {
        return Err(PermsError::InvalidKey(format!(
            "{} is a {} key ({}), not an encryption key",
            public_key_id, public_key.key_type, public_key.alg
        )));
    }
    X25519PublicKey::from_slice(&public_key.key.value)
}
