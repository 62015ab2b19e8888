//! # Arcanum Store
//!
//! Storage abstraction for signed envelopes. Provides a trait-based
//! interface with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`InsertResult`] - Result of inserting an envelope
//! - [`HeadSwap`] - Result of a keyring head compare-and-swap
//!
//! ## Usage
//!
//! ```rust,no_run
//! use arcanum_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("arcanum.db").unwrap();
//!     // let result = store.put(&envelope).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: identifiers are content-derived, so inserting
//!   the same object twice returns `AlreadyExists`
//! - **Keyring heads**: the only mutable rows; moved together with the
//!   envelopes that justify the move, in one transaction

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{HeadSwap, InsertResult, Store};
