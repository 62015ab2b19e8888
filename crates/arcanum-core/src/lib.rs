//! # Arcanum Core
//!
//! The verified object model for Arcanum: every persisted entity is
//! canonically encoded, content-addressed, and signed.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`Identifier`] - 18-byte content address: version, type tag, truncated Blake3
//! - [`Object`] - Closed sum type over every body, dispatched by type tag
//! - [`Envelope`] - `{ id, version, body, sig }` as exchanged with the transport layer
//! - [`Signature`] - Detached Ed25519 signature over identifier bytes
//! - [`Claim`] - Signature or revocation assertion against a public key
//! - [`OrgInvite`] - Invitation state machine
//!
//! ## Canonicalization
//!
//! All bodies are encoded using deterministic CBOR. See [`canonical`] module.

pub mod canonical;
pub mod claim;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod invite;
pub mod object;
pub mod pathexp;
pub mod policy;
pub mod signature;
pub mod types;

pub use canonical::{canonical_bytes, Canonical, CanonicalMap};
pub use claim::{is_revoked, Claim, ClaimChain, ClaimType};
pub use crypto::{Ed25519PublicKey, Ed25519Signature, SigningKeypair, EDDSA};
pub use envelope::Envelope;
pub use error::{CoreError, Result};
pub use invite::{InviteCode, InviteCodeHash, InviteState, OrgInvite};
pub use object::{
    Body, Credential, CredentialValue, Environment, KeyType, Keyring, KeyringMember,
    KeyringMemberKey, Membership, Object, Org, Policy, PolicyAttachment, PrivateKey,
    PrivateKeyValue, Project, PublicKey, PublicKeyValue, Service, Team, TeamType, User,
    SCHEMA_V1,
};
pub use pathexp::{Glob, PathExp, ResourcePattern};
pub use policy::{PolicyAction, PolicyDocument, PolicyEffect, PolicyStatement};
pub use signature::{sign_object, verify_object, KeyDirectory, Signature, TrustedKeys};
pub use types::{now_millis, Identifier, ObjectType, Timestamp};
