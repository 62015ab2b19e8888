//! # Arcanum Permissions
//!
//! Keyring distribution, credential sealing and policy evaluation.
//!
//! ## Overview
//!
//! A keyring generation holds one random master secret. The secret is never
//! stored in the clear: each authorized principal gets a `KeyringMember`
//! row carrying the secret wrapped under that principal's X25519 encryption
//! key. Credentials are sealed under keys derived from the master secret.
//!
//! ## Key Concepts
//!
//! - **MasterSecret**: the per-generation symmetric secret
//! - **KeyringMember**: a wrapped copy of the master secret for one principal
//! - **KeyringArena**: every generation per scope, advanced by compare-and-swap
//! - **Rotation**: a new generation for a new principal set, with every live
//!   credential re-encrypted; the only way to remove a member
//! - **Policy evaluation**: explicit deny beats allow, no match denies
//!
//! ## Usage
//!
//! ```rust,no_run
//! use arcanum_perms::{create_keyring, KeyringArena, Recipient};
//!
//! // let planned = create_keyring(&arena, org_id, project_id, pathexp, &creator, now)?;
//! // arena.commit(planned.expected, planned.generation)?;
//! // let member = add_member(keyring_id, &keyring, &planned.master, &Recipient::of(&bob), &creator, now)?;
//! ```

pub mod crypto;
pub mod error;
pub mod keypair;
pub mod keyring;
pub mod master;
pub mod member;
pub mod policy;

pub use crypto::{
    EphemeralKeyPair, SealNonce, SharedKey, SymmetricKey, X25519PublicKey, X25519Secret,
    CURVE25519, XCHACHA20POLY1305,
};
pub use error::{FieldError, PermsError, PolicyValidationError, Result};
pub use keypair::{
    encryption_recipient, generate_keypairs, GeneratedKeypairs, KeyEncryptionKey, KeypairResult,
    PrincipalKeys,
};
pub use keyring::{
    create_keyring, rotate_keyring, write_credential, Generation, KeyringArena, PlannedGeneration,
    ScopeKey,
};
pub use master::{MasterSecret, CREDENTIAL_NONCE_LEN};
pub use member::{add_member, unwrap_member, wrap_master, Recipient, MEMBER_WRAP_ALG};
pub use policy::{evaluate, validate, validate_json, Decision, DenyReason};
