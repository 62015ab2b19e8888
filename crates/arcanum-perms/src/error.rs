//! Error types for keyring distribution and policy evaluation.

use arcanum_core::{CoreError, Identifier};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during keyring and policy operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Unwrap attempted with a key other than the member's encrypting key.
    /// An authorization failure, not a cryptographic one.
    #[error("key {presented} is not authorized for this member (expected {expected})")]
    UnauthorizedPrincipal {
        presented: Identifier,
        expected: Identifier,
    },

    #[error("key {0} has been revoked")]
    KeyRevoked(Identifier),

    /// A compare-and-swap on a keyring scope or credential lost a race.
    #[error("stale generation: expected head {expected:?}, found {actual:?}")]
    StaleGeneration {
        expected: Option<Identifier>,
        actual: Option<Identifier>,
    },

    #[error("principal {owner_id} already holds a member row in keyring {keyring_id}")]
    DuplicateMember {
        keyring_id: Identifier,
        owner_id: Identifier,
    },

    #[error("no keyring for scope {0}")]
    KeyringNotFound(String),

    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error(transparent)]
    PolicyValidation(#[from] PolicyValidationError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

/// A single problem found while validating a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Path to the offending field, e.g. `statements[1].resource`.
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every problem found in a policy, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("policy validation failed: {}", render(.errors))]
pub struct PolicyValidationError {
    pub errors: Vec<FieldError>,
}

fn render(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
