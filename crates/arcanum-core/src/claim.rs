//! Claims: append-only assertions against a public key.
//!
//! Each key has a chain of claims linked by `previous`. The first claim is a
//! `signature` claim made when the key is created; a `revocation` claim ends
//! trust in the key for good.
//!
//! Revocation is checked by scanning for any revocation claim naming the key.
//! Chain position is deliberately ignored: a revocation anywhere in the set,
//! even one whose `previous` points at a stale head, revokes the key, and no
//! later `signature` claim can undo it.

use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::canonical::{Canonical, CanonicalMap};
use crate::error::Result;
use crate::object::{schema_v1, Body, SCHEMA_V1};
use crate::types::{now_millis, Identifier, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    Signature,
    Revocation,
}

impl ClaimType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimType::Signature => "signature",
            ClaimType::Revocation => "revocation",
        }
    }
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub created_at: Timestamp,
    pub org_id: Identifier,
    pub owner_id: Identifier,
    pub previous: Option<Identifier>,
    pub public_key_id: Identifier,
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
}

impl Claim {
    /// Create a claim stamped with the current time.
    pub fn new(
        org_id: Identifier,
        owner_id: Identifier,
        previous: Option<Identifier>,
        public_key_id: Identifier,
        claim_type: ClaimType,
    ) -> Self {
        Self::at(org_id, owner_id, previous, public_key_id, claim_type, now_millis())
    }

    pub fn at(
        org_id: Identifier,
        owner_id: Identifier,
        previous: Option<Identifier>,
        public_key_id: Identifier,
        claim_type: ClaimType,
        created_at: Timestamp,
    ) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            created_at,
            org_id,
            owner_id,
            previous,
            public_key_id,
            claim_type,
        }
    }

    pub fn is_revocation(&self) -> bool {
        self.claim_type == ClaimType::Revocation
    }
}

impl Canonical for Claim {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .timestamp("created_at", self.created_at)
            .id("org_id", &self.org_id)
            .id("owner_id", &self.owner_id)
            .opt_id("previous", self.previous.as_ref())
            .id("public_key_id", &self.public_key_id)
            .text("type", self.claim_type.as_str())
            .build()
    }
}

/// Whether any revocation claim in `claims` names `public_key_id`.
pub fn is_revoked<'a, I>(public_key_id: &Identifier, claims: I) -> bool
where
    I: IntoIterator<Item = &'a Claim>,
{
    claims
        .into_iter()
        .any(|c| c.is_revocation() && c.public_key_id == *public_key_id)
}

/// The claims made against one key, used to extend its chain.
#[derive(Debug, Clone)]
pub struct ClaimChain {
    public_key_id: Identifier,
    org_id: Identifier,
    owner_id: Identifier,
    claims: Vec<(Identifier, Claim)>,
}

impl ClaimChain {
    pub fn new(public_key_id: Identifier, org_id: Identifier, owner_id: Identifier) -> Self {
        Self {
            public_key_id,
            org_id,
            owner_id,
            claims: Vec::new(),
        }
    }

    /// Collect the claims for `public_key_id` out of an arbitrary claim set.
    pub fn collect<'a, I>(
        public_key_id: Identifier,
        org_id: Identifier,
        owner_id: Identifier,
        claims: I,
    ) -> Self
    where
        I: IntoIterator<Item = (&'a Identifier, &'a Claim)>,
    {
        let mut chain = Self::new(public_key_id, org_id, owner_id);
        for (id, claim) in claims {
            if claim.public_key_id == public_key_id {
                chain.claims.push((*id, claim.clone()));
            }
        }
        chain
    }

    pub fn public_key_id(&self) -> &Identifier {
        &self.public_key_id
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter().map(|(_, c)| c)
    }

    pub fn is_revoked(&self) -> bool {
        is_revoked(&self.public_key_id, self.claims())
    }

    /// The claim no other claim in the chain points back to.
    ///
    /// If several claims qualify (a forked chain), the latest one wins, with
    /// the identifier breaking ties so the choice is stable.
    pub fn head(&self) -> Option<Identifier> {
        let referenced: HashSet<Identifier> =
            self.claims.iter().filter_map(|(_, c)| c.previous).collect();
        self.claims
            .iter()
            .filter(|(id, _)| !referenced.contains(id))
            .max_by_key(|(id, c)| (c.created_at, *id))
            .map(|(id, _)| *id)
    }

    /// Build the next claim, linked to the current head, and record it.
    pub fn extend(&mut self, claim_type: ClaimType, now: Timestamp) -> Result<(Identifier, Claim)> {
        let claim = Claim::at(
            self.org_id,
            self.owner_id,
            self.head(),
            self.public_key_id,
            claim_type,
            now,
        );
        let id = claim.identifier()?;
        self.claims.push((id, claim.clone()));
        Ok((id, claim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectType;

    fn ids() -> (Identifier, Identifier, Identifier) {
        (
            Identifier::derive(ObjectType::Org, b"org"),
            Identifier::derive(ObjectType::User, b"alice"),
            Identifier::derive(ObjectType::PublicKey, b"key"),
        )
    }

    #[test]
    fn test_new_claim_links_previous() {
        let (org, owner, key) = ids();
        let mut chain = ClaimChain::new(key, org, owner);
        let (first_id, first) = chain.extend(ClaimType::Signature, 100).unwrap();
        assert_eq!(first.previous, None);

        let (_, second) = chain.extend(ClaimType::Revocation, 200).unwrap();
        assert_eq!(second.previous, Some(first_id));
        assert!(chain.is_revoked());
    }

    #[test]
    fn test_revocation_is_monotonic() {
        let (org, owner, key) = ids();
        let mut chain = ClaimChain::new(key, org, owner);
        chain.extend(ClaimType::Signature, 100).unwrap();
        chain.extend(ClaimType::Revocation, 200).unwrap();
        chain.extend(ClaimType::Signature, 300).unwrap();
        chain.extend(ClaimType::Signature, 400).unwrap();
        assert!(chain.is_revoked());
    }

    #[test]
    fn test_revocation_ignores_chain_position() {
        let (org, owner, key) = ids();
        // A revocation pointing at nothing, alongside a healthy chain.
        let orphan = Claim::at(org, owner, None, key, ClaimType::Revocation, 1);
        let sig = Claim::at(org, owner, None, key, ClaimType::Signature, 50);
        assert!(is_revoked(&key, [&sig, &orphan]));
        assert!(is_revoked(&key, [&orphan, &sig]));
    }

    #[test]
    fn test_revocation_of_other_key_ignored() {
        let (org, owner, key) = ids();
        let other = Identifier::derive(ObjectType::PublicKey, b"other");
        let revoke_other = Claim::at(org, owner, None, other, ClaimType::Revocation, 1);
        assert!(!is_revoked(&key, [&revoke_other]));
    }

    #[test]
    fn test_collect_filters_by_key() {
        let (org, owner, key) = ids();
        let other = Identifier::derive(ObjectType::PublicKey, b"other");
        let a = Claim::at(org, owner, None, key, ClaimType::Signature, 1);
        let b = Claim::at(org, owner, None, other, ClaimType::Revocation, 2);
        let set = vec![(a.identifier().unwrap(), a), (b.identifier().unwrap(), b)];
        let chain = ClaimChain::collect(key, org, owner, set.iter().map(|(id, c)| (id, c)));
        assert_eq!(chain.claims().count(), 1);
        assert!(!chain.is_revoked());
    }

    #[test]
    fn test_claim_wire_names() {
        let (org, owner, key) = ids();
        let claim = Claim::at(org, owner, None, key, ClaimType::Revocation, 5);
        let json = serde_json::to_value(&claim).unwrap();
        assert_eq!(json["type"], "revocation");
        assert_eq!(json["created_at"], 5);
        assert!(json["previous"].is_null());
    }
}
