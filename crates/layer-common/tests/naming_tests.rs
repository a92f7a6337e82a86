//! Properties of the layer name codec across many identities.

use std::collections::{HashMap, HashSet};

use layer_common::naming::{decode, encode, is_valid_external_name};
use layer_common::{DatasetKind, LayerIdentity};

/// Field values chosen to stress separators, suffix words and tags.
const FIELDS: &[&str] = &[
    "laos",
    "a",
    "b",
    "a_b",
    "a b",
    "b_a",
    "a_b_c",
    "temp",
    "rcp45",
    "rcp_45",
    "giri",
    "energy",
    "boundary",
    "t1",
    "2050",
    "1758182825568",
    "Mông",
];

/// Every identity that can be built from the field grid.
fn all_identities() -> Vec<LayerIdentity> {
    let mut out = Vec::new();
    for country in FIELDS {
        for kind in DatasetKind::ALL {
            match kind {
                DatasetKind::Climate | DatasetKind::Giri => {
                    for variable in FIELDS {
                        for scenario in FIELDS {
                            if let Ok(id) =
                                LayerIdentity::new(country, kind, Some(variable), Some(scenario))
                            {
                                out.push(id);
                            }
                        }
                    }
                }
                DatasetKind::Energy => {
                    for variable in FIELDS {
                        if let Ok(id) = LayerIdentity::new(country, kind, Some(variable), None) {
                            out.push(id);
                        }
                    }
                }
                DatasetKind::Boundary => {
                    if let Ok(id) = LayerIdentity::new(country, kind, None, None) {
                        out.push(id);
                    }
                    for variable in FIELDS {
                        if let Ok(id) = LayerIdentity::new(country, kind, Some(variable), None) {
                            out.push(id);
                        }
                    }
                }
            }
        }
    }
    out
}

#[test]
fn test_distinct_identities_encode_to_distinct_names() {
    let identities: HashSet<LayerIdentity> = all_identities().into_iter().collect();
    assert!(identities.len() > 1000);

    let mut seen: HashMap<String, LayerIdentity> = HashMap::new();
    for identity in &identities {
        let name = encode(identity);
        if let Some(previous) = seen.insert(name.clone(), identity.clone()) {
            panic!("collision on '{}': {} vs {}", name, previous, identity);
        }
    }
}

#[test]
fn test_encoded_names_use_legal_characters() {
    for identity in all_identities() {
        let name = encode(&identity);
        assert!(is_valid_external_name(&name), "illegal name: {}", name);
        assert!(!name.starts_with('_') && !name.ends_with('_'), "edge underscore: {}", name);
    }
}

#[test]
fn test_decode_inverts_encode() {
    for identity in all_identities() {
        let name = encode(&identity);
        let decoded = decode(&name).unwrap_or_else(|| panic!("failed to decode '{}'", name));
        assert_eq!(decoded.identity, identity, "round trip of '{}'", name);
        assert_eq!(decoded.tag, None);
    }
}

#[test]
fn test_tagged_names_share_identity_with_canonical_name() {
    let identity = LayerIdentity::climate("laos", "temp", "rcp45").unwrap();
    let canonical = encode(&identity);

    for tag in ["t1", "t2", "1758163249400"] {
        let tagged = format!("{}_{}", canonical, tag);
        let decoded = decode(&tagged).unwrap();
        assert_eq!(decoded.identity, identity);
        assert_eq!(decoded.tag.as_deref(), Some(tag));
    }
}

#[test]
fn test_spec_scenario_name() {
    let identity = LayerIdentity::new("laos", DatasetKind::Climate, Some("temp"), Some("rcp45")).unwrap();
    assert_eq!(encode(&identity), "laos_temp_rcp45");
}
