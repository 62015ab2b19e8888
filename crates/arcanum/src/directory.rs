//! Key lookup backed by the store.
//!
//! Two verification strengths are used when reading envelopes back:
//!
//! - full: identifier, signature, and the signer must not be revoked
//! - integrity: identifier and signature only
//!
//! Key material and claims are read with integrity checks so a revoked key
//! and its revocation claim stay listable. Everything that grants access is
//! re-checked against revocation at the point of use.

use arcanum_core::{
    verify_object, Claim, Envelope, Identifier, KeyDirectory, KeyType, ObjectType, PublicKey,
    Timestamp, TrustedKeys,
};

use crate::error::Result;

/// A directory view that reports no key as revoked.
pub(crate) struct IntegrityOnly<'a, D: ?Sized>(pub &'a D);

impl<D: KeyDirectory + ?Sized> KeyDirectory for IntegrityOnly<'_, D> {
    fn public_key(&self, id: &Identifier) -> Option<PublicKey> {
        self.0.public_key(id)
    }

    fn is_revoked(&self, _id: &Identifier) -> bool {
        false
    }
}

/// Whether an envelope of this type is checked for integrity only on read.
pub(crate) fn is_key_record(object_type: ObjectType) -> bool {
    matches!(
        object_type,
        ObjectType::PublicKey | ObjectType::PrivateKey | ObjectType::Claim
    )
}

/// Verify an envelope read back from the store.
pub(crate) fn verify_stored<D: KeyDirectory + ?Sized>(envelope: &Envelope, directory: &D) -> Result<()> {
    if is_key_record(envelope.object_type()) {
        verify_integrity(envelope, directory)
    } else {
        Ok(envelope.verify(directory)?)
    }
}

pub(crate) fn verify_integrity<D: KeyDirectory + ?Sized>(envelope: &Envelope, directory: &D) -> Result<()> {
    Ok(verify_object(
        &envelope.id,
        &envelope.body,
        &envelope.sig,
        &IntegrityOnly(directory),
    )?)
}

/// Every public key and claim currently stored.
#[derive(Debug, Clone, Default)]
pub struct KeySnapshot {
    pub keys: Vec<(Identifier, PublicKey)>,
    pub claims: Vec<(Identifier, Claim)>,
    pub directory: TrustedKeys,
}

impl KeySnapshot {
    pub(crate) fn new(keys: Vec<(Identifier, PublicKey)>, claims: Vec<(Identifier, Claim)>) -> Self {
        let mut directory = TrustedKeys::new();
        for (id, key) in &keys {
            directory.insert_key(*id, key.clone());
        }
        for (_, claim) in &claims {
            directory.insert_claim(claim.clone());
        }
        Self {
            keys,
            claims,
            directory,
        }
    }

    /// Claims made against `public_key_id`.
    pub fn claims_for<'a>(
        &'a self,
        public_key_id: &'a Identifier,
    ) -> impl Iterator<Item = (&'a Identifier, &'a Claim)> + 'a {
        self.claims
            .iter()
            .filter(move |(_, c)| c.public_key_id == *public_key_id)
            .map(|(id, c)| (id, c))
    }

    /// Keys of `owner_id` in `org_id`.
    pub fn keys_of<'a>(
        &'a self,
        org_id: &'a Identifier,
        owner_id: &'a Identifier,
    ) -> impl Iterator<Item = &'a (Identifier, PublicKey)> + 'a {
        self.keys
            .iter()
            .filter(move |(_, k)| k.org_id == *org_id && k.owner_id == *owner_id)
    }

    /// The newest unrevoked encryption key of `owner_id`, skipping expired
    /// ones when `now` is given.
    pub fn encryption_key<'a>(
        &'a self,
        org_id: &'a Identifier,
        owner_id: &'a Identifier,
        now: Option<Timestamp>,
    ) -> Option<&'a (Identifier, PublicKey)> {
        self.keys_of(org_id, owner_id)
            .filter(|(_, k)| k.key_type == KeyType::Encryption)
            .filter(|(id, _)| !self.directory.is_revoked(id))
            .filter(|(_, k)| now.map_or(true, |now| !k.is_expired(now)))
            .max_by_key(|(id, k)| (k.created_at, *id))
    }
}

impl KeyDirectory for KeySnapshot {
    fn public_key(&self, id: &Identifier) -> Option<PublicKey> {
        self.directory.public_key(id)
    }

    fn is_revoked(&self, id: &Identifier) -> bool {
        self.directory.is_revoked(id)
    }
}
