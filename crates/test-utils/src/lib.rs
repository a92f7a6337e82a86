//! Shared test utilities for the layer lifecycle workspace.
//!
//! This crate provides common testing infrastructure including:
//! - [`FakePublisher`], a scriptable in-memory map server
//! - [`InMemoryStore`], a metadata store with catalog upsert semantics
//! - Registration and classification fixtures
//! - Temporary directory helpers
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../../crates/test-utils" }
//! ```

pub mod fixtures;
pub mod paths;
pub mod publisher;
pub mod store;

pub use fixtures::*;
pub use paths::*;
pub use publisher::{Call, FakePublisher};
pub use store::InMemoryStore;

#[doc(hidden)]
pub use layer_common;

/// Assert that a result failed with the given `PublishErrorKind` variant.
///
/// # Usage
///
/// ```ignore
/// assert_publish_err!(client.delete_layer("x").await, Rejected);
/// ```
#[macro_export]
macro_rules! assert_publish_err {
    ($result:expr, $kind:ident) => {{
        match $result {
            Ok(_) => panic!("expected {} error, got Ok", stringify!($kind)),
            Err(e) => assert_eq!(
                e.kind,
                $crate::layer_common::PublishErrorKind::$kind,
                "unexpected error: {}",
                e
            ),
        }
    }};
}
