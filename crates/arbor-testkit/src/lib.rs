//! # Arbor Testkit
//!
//! Testing utilities for Arbor.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Feed keys, object trees, linked node pairs and polling
//!   helpers for integration tests
//! - **Generators**: Proptest strategies for identifiers, roots, objects
//!   and wire frames
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use arbor_testkit::generators::{root_from_params, RootParams};
//!
//! proptest! {
//!     #[test]
//!     fn root_hash_is_deterministic(params: RootParams) {
//!         let r1 = root_from_params(&params);
//!         let r2 = root_from_params(&params);
//!         prop_assert_eq!(r1.hash(), r2.hash());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Quickly set up test scenarios:
//!
//! ```rust
//! use arbor_testkit::fixtures::{ObjectTree, TestFixture};
//!
//! let fixture = TestFixture::new();
//! let tree = ObjectTree::three_level();
//! let root = fixture.make_root(1, tree.top.clone());
//! assert_eq!(root.refs(), tree.top.as_slice());
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    fast_config, init_tracing, memory_node, multi_feed_fixtures, wait_for_latest, wait_until,
    LinkedPair, ObjectTree, TestFixture,
};
pub use generators::{root_from_params, RootParams};
