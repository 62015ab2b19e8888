//! Detached signatures over identifiers.
//!
//! A signature covers the raw identifier bytes, never the body; the body is
//! bound through the identifier derivation. A `public_key_id` of `None`
//! asserts a self-signature, which is only meaningful on a `PublicKey`
//! object: the verifier uses the key carried in the body itself.

use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::canonical::{Canonical, CanonicalMap};
use crate::claim::{is_revoked, Claim};
use crate::crypto::{Ed25519PublicKey, Ed25519Signature, SigningKeypair, EDDSA};
use crate::error::{CoreError, Result};
use crate::object::{Object, PublicKey};
use crate::types::{hex_bytes, Identifier};

/// `{ alg, public_key_id, value }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub alg: String,
    pub public_key_id: Option<Identifier>,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

impl Signature {
    /// Sign `id` with `keypair`. Pass `None` as `public_key_id` to self-sign.
    pub fn sign(id: &Identifier, keypair: &SigningKeypair, public_key_id: Option<Identifier>) -> Self {
        Self {
            alg: EDDSA.to_string(),
            public_key_id,
            value: keypair.sign(id).as_bytes().to_vec(),
        }
    }

    pub fn is_self_signed(&self) -> bool {
        self.public_key_id.is_none()
    }

    /// Verify against a known public key body.
    pub fn verify(&self, id: &Identifier, key: &PublicKey) -> Result<()> {
        if self.alg != EDDSA || key.alg != EDDSA {
            return Err(CoreError::AlgorithmMismatch {
                signature: self.alg.clone(),
                key: key.alg.clone(),
            });
        }
        let public = Ed25519PublicKey::from_slice(&key.key.value)?;
        let sig = Ed25519Signature::from_slice(&self.value)
            .map_err(|_| CoreError::SignatureMismatch(*id))?;
        public.verify(id, &sig)
    }
}

impl Canonical for Signature {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .text("alg", &self.alg)
            .opt_id("public_key_id", self.public_key_id.as_ref())
            .bytes("value", &self.value)
            .build()
    }
}

/// Compute the identifier of `object` and sign it.
///
/// This is the call the transport layer makes for every constructed object.
pub fn sign_object(
    object: &Object,
    keypair: &SigningKeypair,
    public_key_id: Option<Identifier>,
) -> Result<(Identifier, Signature)> {
    let id = object.identifier()?;
    let sig = Signature::sign(&id, keypair, public_key_id);
    Ok((id, sig))
}

/// Lookup of trusted public keys and their revocation state.
pub trait KeyDirectory {
    fn public_key(&self, id: &Identifier) -> Option<PublicKey>;

    fn is_revoked(&self, id: &Identifier) -> bool;
}

/// Verify that `id` names `object` and that `sig` is a valid, unrevoked
/// signature over it.
pub fn verify_object<D: KeyDirectory + ?Sized>(
    id: &Identifier,
    object: &Object,
    sig: &Signature,
    directory: &D,
) -> Result<()> {
    let derived = object.identifier()?;
    if derived != *id {
        return Err(CoreError::IdentifierMismatch {
            claimed: *id,
            derived,
        });
    }

    match sig.public_key_id {
        None => {
            let Object::PublicKey(key) = object else {
                return Err(CoreError::UnknownSigner(*id));
            };
            if directory.is_revoked(id) {
                return Err(CoreError::KeyRevoked(*id));
            }
            sig.verify(id, key)
        }
        Some(signer) => {
            let key = directory
                .public_key(&signer)
                .ok_or(CoreError::UnknownSigner(signer))?;
            if directory.is_revoked(&signer) {
                return Err(CoreError::KeyRevoked(signer));
            }
            sig.verify(id, &key)
        }
    }
}

/// In-memory key directory built from public keys and claims.
#[derive(Debug, Clone, Default)]
pub struct TrustedKeys {
    keys: HashMap<Identifier, PublicKey>,
    claims: Vec<Claim>,
}

impl TrustedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&mut self, id: Identifier, key: PublicKey) {
        self.keys.insert(id, key);
    }

    pub fn insert_claim(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }
}

impl KeyDirectory for TrustedKeys {
    fn public_key(&self, id: &Identifier) -> Option<PublicKey> {
        self.keys.get(id).cloned()
    }

    fn is_revoked(&self, id: &Identifier) -> bool {
        is_revoked(id, &self.claims)
    }
}
