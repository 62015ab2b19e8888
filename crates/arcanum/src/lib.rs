//! # Arcanum
//!
//! The vault API for Arcanum: secrets distributed through signed,
//! content-addressed objects.
//!
//! ## Overview
//!
//! - **Objects**: Typed bodies, identified by a hash of their canonical
//!   encoding and signed by their author
//! - **Keys**: Signing and encryption keypairs whose lifecycle is a signed
//!   claim chain; a revocation claim ends a key's life
//! - **Keyrings**: Generations of a per-scope master secret, wrapped once per
//!   member; rotation is a new generation
//! - **Policies**: Allow/deny statements attached to teams
//! - **Invites**: A four-state org invite machine
//!
//! ## Key Concepts
//!
//! - **Verified reads**: Envelopes are checked against their identifier and
//!   signature when read back.
//! - **Revocation at point of use**: Revoked keys stay listable but can no
//!   longer sign, receive or unwrap.
//! - **Heads**: Each keyring scope has one current generation, moved by
//!   compare-and-swap.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use arcanum::{Vault, VaultConfig};
//! use arcanum::core::{Identifier, ObjectType, PathExp};
//! use arcanum::perms::{KeyEncryptionKey, ScopeKey};
//! use arcanum::store::SqliteStore;
//!
//! async fn example() -> arcanum::Result<()> {
//!     let store = SqliteStore::open("arcanum.db")?;
//!     let vault = Vault::open(store, VaultConfig::default()).await?;
//!
//!     let org = Identifier::derive(ObjectType::Org, b"acme");
//!     let project = Identifier::derive(ObjectType::Project, b"web");
//!     let alice = Identifier::derive(ObjectType::User, b"alice");
//!     let keys = vault
//!         .generate_keypairs(org, alice, &KeyEncryptionKey::generate())
//!         .await?
//!         .keys;
//!
//!     let pathexp = PathExp::new("acme", "web", "prod", "*", "*", "*")?;
//!     vault.create_keyring(org, project, pathexp.clone(), &keys).await?;
//!
//!     let scope = ScopeKey::new(project, &pathexp);
//!     vault.set_credential(&scope, "DB_PASSWORD", b"hunter2", &keys).await?;
//!     let value = vault.get_credential(&scope, "DB_PASSWORD", &keys).await?;
//!     assert!(value.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `arcanum::core` - objects, identifiers, signatures, claims, invites
//! - `arcanum::perms` - keypairs, keyrings, credentials, policy evaluation
//! - `arcanum::store` - storage abstraction and SQLite

pub mod config;
pub mod directory;
pub mod error;
mod keyrings;
pub mod vault;

pub use arcanum_core as core;
pub use arcanum_perms as perms;
pub use arcanum_store as store;

pub use config::{VaultConfig, DEFAULT_KEY_LIFETIME_MS};
pub use directory::KeySnapshot;
pub use error::{Result, VaultError};
pub use vault::{Vault, USER_POLICY};

pub use arcanum_core::{Envelope, Identifier, Object, ObjectType, PathExp, PolicyAction};
pub use arcanum_perms::{Decision, DenyReason, PrincipalKeys, ScopeKey};
