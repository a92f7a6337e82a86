//! Publish client for the external map server.
//!
//! [`PublishBackend`] is the capability the lifecycle manager depends on;
//! [`GeoServerClient`] implements it against the GeoServer REST API.
//!
//! The client never retries. Every call has a bounded timeout and fails with
//! a [`PublishError`](layer_common::PublishError) classified as
//! unreachable, rejected or not found, so callers decide the retry policy.

mod backend;
mod client;
pub mod rest;
pub mod style;

pub use backend::{ArtifactSource, AttributeHints, PublishBackend, ServiceKind};
pub use client::{GeoServerClient, GeoServerConfig, ProxyResponse};
