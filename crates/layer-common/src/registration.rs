//! Layers as observed on the map server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::LayerIdentity;
use crate::naming;

/// A layer registered on the map server.
///
/// Owned by the map server; the services only observe it through listing
/// calls and never persist it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRegistration {
    pub external_name: String,
    pub identity: LayerIdentity,
    pub created_at: Option<DateTime<Utc>>,
    pub source_artifact_path: Option<String>,
}

impl LayerRegistration {
    /// Build a registration from a listed layer name.
    ///
    /// Returns `None` for names the codec does not recognise. When the
    /// listing carries no creation time, an epoch-millisecond tag in the
    /// name is used instead.
    pub fn from_listed_name(
        external_name: impl Into<String>,
        created_at: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        let external_name = external_name.into();
        let decoded = naming::decode(&external_name)?;
        let created_at = created_at.or_else(|| decoded.tagged_at());

        Some(Self {
            external_name,
            identity: decoded.identity,
            created_at,
            source_artifact_path: None,
        })
    }

    pub fn country(&self) -> &str {
        self.identity.country()
    }
}
