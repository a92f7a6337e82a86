//! Common types shared across the climate layer services.
//!
//! - [`LayerIdentity`]: the logical identity of a published layer
//! - [`naming`]: deterministic layer name encoding/decoding
//! - [`LayerRegistration`]: a layer as observed on the map server
//! - [`error`]: publish and lifecycle error taxonomy

pub mod error;
pub mod identity;
pub mod naming;
pub mod registration;

pub use error::{LifecycleError, LifecycleResult, PublishError, PublishErrorKind, PublishResult};
pub use identity::{normalize_field, DatasetKind, IdentityError, LayerIdentity};
pub use naming::{decode, encode, DecodedName};
pub use registration::LayerRegistration;
