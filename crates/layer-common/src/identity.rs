//! Logical layer identity.
//!
//! Two registrations on the map server are the same logical layer iff their
//! [`LayerIdentity`] values are equal, regardless of the external name they
//! were registered under.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of dataset a layer was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// Climate projection raster (variable + scenario)
    Climate,
    /// GIRI hazard raster (variable + scenario)
    Giri,
    /// Energy infrastructure point layer (infrastructure type)
    Energy,
    /// Administrative boundary polygons (optional admin level)
    Boundary,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 4] = [
        DatasetKind::Climate,
        DatasetKind::Giri,
        DatasetKind::Energy,
        DatasetKind::Boundary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Climate => "climate",
            DatasetKind::Giri => "giri",
            DatasetKind::Energy => "energy",
            DatasetKind::Boundary => "boundary",
        }
    }

    /// Literal name suffix for this kind. Climate layers carry none.
    pub fn name_suffix(&self) -> Option<&'static str> {
        match self {
            DatasetKind::Climate => None,
            DatasetKind::Giri => Some("giri"),
            DatasetKind::Energy => Some("energy"),
            DatasetKind::Boundary => Some("boundary"),
        }
    }

    /// Find the kind whose suffix equals `token`.
    pub fn from_suffix(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name_suffix() == Some(token))
    }

    /// Raster kinds are published as coverages and served over WMS.
    pub fn is_raster(&self) -> bool {
        matches!(self, DatasetKind::Climate | DatasetKind::Giri)
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatasetKind {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "climate" => Ok(DatasetKind::Climate),
            "giri" => Ok(DatasetKind::Giri),
            "energy" => Ok(DatasetKind::Energy),
            "boundary" | "boundaries" => Ok(DatasetKind::Boundary),
            other => Err(IdentityError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors raised when building a [`LayerIdentity`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Unknown dataset kind: {0}")]
    UnknownKind(String),

    #[error("Field '{field}' is required for {kind} layers")]
    MissingField { kind: DatasetKind, field: &'static str },

    #[error("Field '{field}' is not allowed for {kind} layers")]
    UnexpectedField { kind: DatasetKind, field: &'static str },

    #[error("Field '{field}' is empty after normalization (input: {input:?})")]
    EmptyField { field: &'static str, input: String },

    #[error("Climate {field} '{value}' collides with a reserved dataset suffix")]
    ReservedWord { field: &'static str, value: String },
}

/// Normalize a free-form field into the external identifier alphabet.
///
/// Lowercases, maps whitespace and `-` to `_`, strips every other character
/// outside `[a-z0-9_]`, collapses `_` runs and trims `_` from both ends.
pub fn normalize_field(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let mapped = if ch.is_whitespace() || ch == '-' || ch == '_' {
            '_'
        } else if ch.is_ascii_alphanumeric() {
            ch.to_ascii_lowercase()
        } else {
            continue;
        };

        if mapped == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(mapped);
    }

    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Logical identity of a layer.
///
/// Fields are normalized on construction and the per-kind shape is
/// validated, so every value of this type encodes to a legal, unique name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity")]
pub struct LayerIdentity {
    country: String,
    dataset_kind: DatasetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    variable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
}

impl LayerIdentity {
    pub fn new(
        country: &str,
        dataset_kind: DatasetKind,
        variable: Option<&str>,
        scenario: Option<&str>,
    ) -> Result<Self, IdentityError> {
        let country = required_field("country", country)?;
        let variable = variable.map(|v| required_field("variable", v)).transpose()?;
        let scenario = scenario.map(|s| required_field("scenario", s)).transpose()?;

        match dataset_kind {
            DatasetKind::Climate | DatasetKind::Giri => {
                if variable.is_none() {
                    return Err(IdentityError::MissingField { kind: dataset_kind, field: "variable" });
                }
                if scenario.is_none() {
                    return Err(IdentityError::MissingField { kind: dataset_kind, field: "scenario" });
                }
            }
            DatasetKind::Energy => {
                if variable.is_none() {
                    return Err(IdentityError::MissingField { kind: dataset_kind, field: "variable" });
                }
                if scenario.is_some() {
                    return Err(IdentityError::UnexpectedField { kind: dataset_kind, field: "scenario" });
                }
            }
            DatasetKind::Boundary => {
                if scenario.is_some() {
                    return Err(IdentityError::UnexpectedField { kind: dataset_kind, field: "scenario" });
                }
            }
        }

        // Climate names carry no suffix, so their fields must not look like one.
        if dataset_kind == DatasetKind::Climate {
            for (field, value) in [("variable", &variable), ("scenario", &scenario)] {
                if let Some(v) = value.as_deref() {
                    if DatasetKind::from_suffix(v).is_some() {
                        return Err(IdentityError::ReservedWord { field, value: v.to_string() });
                    }
                }
            }
        }

        Ok(Self { country, dataset_kind, variable, scenario })
    }

    pub fn climate(country: &str, variable: &str, scenario: &str) -> Result<Self, IdentityError> {
        Self::new(country, DatasetKind::Climate, Some(variable), Some(scenario))
    }

    pub fn giri(country: &str, variable: &str, scenario: &str) -> Result<Self, IdentityError> {
        Self::new(country, DatasetKind::Giri, Some(variable), Some(scenario))
    }

    pub fn energy(country: &str, infrastructure_type: &str) -> Result<Self, IdentityError> {
        Self::new(country, DatasetKind::Energy, Some(infrastructure_type), None)
    }

    pub fn boundary(country: &str, admin_level: Option<&str>) -> Result<Self, IdentityError> {
        Self::new(country, DatasetKind::Boundary, admin_level, None)
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn dataset_kind(&self) -> DatasetKind {
        self.dataset_kind
    }

    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    pub fn scenario(&self) -> Option<&str> {
        self.scenario.as_deref()
    }

    /// Kind-specific fields in encoding order.
    pub(crate) fn name_fields(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.country.as_str())
            .chain(self.variable.as_deref())
            .chain(self.scenario.as_deref())
    }
}

impl std::fmt::Display for LayerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.country, self.dataset_kind)?;
        if let Some(v) = &self.variable {
            write!(f, "/{}", v)?;
        }
        if let Some(s) = &self.scenario {
            write!(f, "/{}", s)?;
        }
        Ok(())
    }
}

fn required_field(field: &'static str, input: &str) -> Result<String, IdentityError> {
    let normalized = normalize_field(input);
    if normalized.is_empty() {
        return Err(IdentityError::EmptyField { field, input: input.to_string() });
    }
    Ok(normalized)
}

#[derive(Deserialize)]
struct RawIdentity {
    country: String,
    dataset_kind: DatasetKind,
    #[serde(default)]
    variable: Option<String>,
    #[serde(default)]
    scenario: Option<String>,
}

impl TryFrom<RawIdentity> for LayerIdentity {
    type Error = IdentityError;

    fn try_from(raw: RawIdentity) -> Result<Self, Self::Error> {
        LayerIdentity::new(
            &raw.country,
            raw.dataset_kind,
            raw.variable.as_deref(),
            raw.scenario.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_field() {
        assert_eq!(normalize_field("Laos"), "laos");
        assert_eq!(normalize_field("Solar Power-Plant"), "solar_power_plant");
        assert_eq!(normalize_field("  admin  1 "), "admin_1");
        assert_eq!(normalize_field("Mông Cổ"), "mng_c");
        assert_eq!(normalize_field("a__b"), "a_b");
        assert_eq!(normalize_field("_x_"), "x");
        assert_eq!(normalize_field("!!!"), "");
    }

    #[test]
    fn test_identity_normalizes_fields() {
        let a = LayerIdentity::climate("Laos", "Temp", "RCP-4.5").unwrap();
        let b = LayerIdentity::climate(" LAOS ", "temp", "rcp_45").unwrap();
        assert_eq!(a.country(), "laos");
        assert_eq!(a.scenario(), Some("rcp_45"));
        assert_eq!(a, b);

        let c = LayerIdentity::climate("laos", "temp", "rcp45").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_identity_shape_validation() {
        assert!(matches!(
            LayerIdentity::new("laos", DatasetKind::Climate, Some("temp"), None),
            Err(IdentityError::MissingField { field: "scenario", .. })
        ));
        assert!(matches!(
            LayerIdentity::new("laos", DatasetKind::Energy, Some("solar"), Some("x")),
            Err(IdentityError::UnexpectedField { field: "scenario", .. })
        ));
        assert!(matches!(
            LayerIdentity::new("???", DatasetKind::Boundary, None, None),
            Err(IdentityError::EmptyField { field: "country", .. })
        ));
        assert!(LayerIdentity::boundary("bhutan", None).is_ok());
    }

    #[test]
    fn test_climate_fields_cannot_mimic_suffix() {
        assert_eq!(
            LayerIdentity::climate("laos", "flood", "Energy"),
            Err(IdentityError::ReservedWord { field: "scenario", value: "energy".to_string() })
        );
        assert!(matches!(
            LayerIdentity::climate("laos", "boundary", "t1"),
            Err(IdentityError::ReservedWord { field: "variable", .. })
        ));
        // Other kinds end with their suffix, so the restriction is climate-only.
        assert!(LayerIdentity::giri("laos", "flood", "energy").is_ok());
    }

    #[test]
    fn test_identity_deserialize_validates() {
        let ok: LayerIdentity = serde_json::from_str(
            r#"{"country":"Laos","dataset_kind":"climate","variable":"temp","scenario":"rcp45"}"#,
        )
        .unwrap();
        assert_eq!(ok.country(), "laos");

        let err = serde_json::from_str::<LayerIdentity>(
            r#"{"country":"laos","dataset_kind":"energy"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_dataset_kind_parse() {
        assert_eq!("GIRI".parse::<DatasetKind>().unwrap(), DatasetKind::Giri);
        assert_eq!("boundaries".parse::<DatasetKind>().unwrap(), DatasetKind::Boundary);
        assert!("vector".parse::<DatasetKind>().is_err());
    }
}
