//! Error types for the Arcanum core object model.

use thiserror::Error;

use crate::types::Identifier;

/// Errors raised while encoding, identifying, signing or transitioning objects.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The canonical encoder was handed something it cannot encode
    /// deterministically. Indicates a programming defect; never retried.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("signature verification failed for {0}")]
    SignatureMismatch(Identifier),

    #[error("signature algorithm {signature} does not match key algorithm {key}")]
    AlgorithmMismatch { signature: String, key: String },

    #[error("malformed public key: {0}")]
    MalformedPublicKey(String),

    #[error("public key {0} has been revoked")]
    KeyRevoked(Identifier),

    #[error("signing key {0} is not known")]
    UnknownSigner(Identifier),

    #[error("public key {0} has expired")]
    KeyExpired(Identifier),

    #[error("identifier mismatch: envelope claims {claimed}, body derives {derived}")]
    IdentifierMismatch {
        claimed: Identifier,
        derived: Identifier,
    },

    #[error("unknown object type tag 0x{0:02x}")]
    UnknownObjectType(u8),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("invite code does not match")]
    InviteCodeMismatch,

    #[error("invite cannot be approved by its invitee")]
    SelfApproval,

    #[error("invalid path expression: {0}")]
    InvalidPathExp(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
