//! Error types for the Vault.

use arcanum_core::{CoreError, Identifier, PolicyAction};
use arcanum_perms::{DenyReason, PermsError};
use arcanum_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Encoding, signature, revocation or state-machine error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Keyring, credential or policy error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("object not found: {0}")]
    NotFound(Identifier),

    /// The principal holds no member row in the current generation.
    #[error("principal {owner_id} is not a member of keyring {keyring_id}")]
    NotAMember {
        keyring_id: Identifier,
        owner_id: Identifier,
    },

    /// No unrevoked, unexpired encryption key for the principal.
    #[error("principal {0} has no usable encryption key")]
    NoEncryptionKey(Identifier),

    /// Policy evaluation refused the request.
    #[error("{owner_id} may not {action} {resource} ({reason:?})")]
    Unauthorized {
        owner_id: Identifier,
        action: PolicyAction,
        resource: String,
        reason: DenyReason,
    },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for Vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
