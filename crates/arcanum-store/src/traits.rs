//! Store trait: the abstract interface for envelope persistence.
//!
//! Objects are immutable and content-addressed, so the store never updates a
//! row. The only mutable state is the head pointer of each keyring scope,
//! which moves by compare-and-swap.

use async_trait::async_trait;
use arcanum_core::{Envelope, Identifier, ObjectType};

use crate::error::Result;

/// Result of inserting an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    /// Same identifier already stored. Not an error: identical bodies derive
    /// identical identifiers.
    AlreadyExists,
}

/// Result of a compare-and-swap on a keyring head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadSwap {
    /// The head matched; envelopes were written and the head moved.
    Swapped,
    /// Another writer moved the head first. Nothing was written.
    Stale { actual: Option<Identifier> },
}

/// Async interface for envelope persistence.
///
/// For SQLite, work runs on `spawn_blocking` to keep the runtime free.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert an envelope. Idempotent on identifier.
    async fn put(&self, envelope: &Envelope) -> Result<InsertResult>;

    /// Insert several envelopes, all or nothing.
    async fn put_batch(&self, envelopes: &[Envelope]) -> Result<Vec<InsertResult>>;

    async fn get(&self, id: &Identifier) -> Result<Option<Envelope>>;

    async fn contains(&self, id: &Identifier) -> Result<bool>;

    /// Every envelope of one type, in insertion order.
    async fn list_by_type(&self, object_type: ObjectType) -> Result<Vec<Envelope>>;

    /// Current keyring generation for `scope`.
    async fn keyring_head(&self, scope: &str) -> Result<Option<Identifier>>;

    /// Write `envelopes` and move the head of `scope` from `expected` to
    /// `new`, all or nothing.
    ///
    /// Passing `new == expected` writes envelopes that belong to the current
    /// generation (a member grant, a credential version) while still failing
    /// if a rotation committed in between.
    async fn swap_keyring_head(
        &self,
        scope: &str,
        expected: Option<Identifier>,
        new: Identifier,
        envelopes: &[Envelope],
    ) -> Result<HeadSwap>;
}
