//! # Arcanum Testkit
//!
//! Testing utilities for Arcanum.
//!
//! ## Overview
//!
//! - **Golden vectors**: Fixed bodies with their expected canonical bytes
//! - **Generators**: Proptest strategies for identifiers, path expressions,
//!   actions and policy statements
//! - **Fixtures**: A vault over a memory store, with principals on demand
//!
//! ## Golden Vectors
//!
//! ```rust
//! use arcanum_testkit::vectors::{all_vectors, verify_all_vectors};
//!
//! for (name, matches, hex) in verify_all_vectors() {
//!     assert!(matches, "{}: {}", name, hex);
//! }
//! assert!(!all_vectors().is_empty());
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use arcanum_testkit::fixtures::TestVault;
//!
//! async fn example() {
//!     let fixture = TestVault::new().await;
//!     let alice = fixture.principal("alice").await;
//!     let scope = fixture.keyring(&alice).await;
//!     fixture.vault.set_credential(&scope, "TOKEN", b"abc", &alice).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{fixed_id, TestVault};
