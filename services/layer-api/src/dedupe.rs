//! Duplicate registration resolution.
//!
//! Repeated uploads used to register the same logical layer under several
//! names (`laos_temp_rcp45`, `laos_temp_rcp45_t2`, ...). [`resolve`] keeps
//! one registration of every identity and marks the rest stale. The
//! canonical name is the one publish writes and the read path serves, so it
//! always survives; among legacy copies only, the newest wins.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use layer_common::{naming, LayerIdentity, LayerRegistration};
use serde::Serialize;

/// Partition of registrations into survivors and deletion candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    /// Exactly one registration per identity
    pub kept: Vec<LayerRegistration>,
    pub stale: Vec<LayerRegistration>,
}

fn is_canonical(reg: &LayerRegistration) -> bool {
    naming::encode(&reg.identity) == reg.external_name
}

/// Survivor first: the canonical name beats any tagged copy, then known
/// creation time beats unknown, later beats earlier, and finally the
/// lexicographically greatest name wins.
fn survivor_first(a: &LayerRegistration, b: &LayerRegistration) -> Ordering {
    is_canonical(b)
        .cmp(&is_canonical(a))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.external_name.cmp(&a.external_name))
}

/// Group registrations by identity and keep the survivor of each group.
///
/// Pure and deterministic: the result does not depend on input order.
/// Repeated entries for the same external name count once.
pub fn resolve(registrations: Vec<LayerRegistration>) -> Resolution {
    let mut by_name: BTreeMap<String, LayerRegistration> = BTreeMap::new();
    for reg in registrations {
        match by_name.get(&reg.external_name) {
            Some(seen) if survivor_first(seen, &reg) != Ordering::Greater => {}
            _ => {
                by_name.insert(reg.external_name.clone(), reg);
            }
        }
    }

    let mut groups: BTreeMap<LayerIdentity, Vec<LayerRegistration>> = BTreeMap::new();
    for reg in by_name.into_values() {
        groups.entry(reg.identity.clone()).or_default().push(reg);
    }

    let mut ranked: Vec<Vec<LayerRegistration>> = groups
        .into_values()
        .map(|mut group| {
            group.sort_by(survivor_first);
            group
        })
        .collect();
    ranked.sort_by(|a, b| a[0].external_name.cmp(&b[0].external_name));

    let mut resolution = Resolution::default();
    for group in ranked {
        let mut members = group.into_iter();
        if let Some(survivor) = members.next() {
            resolution.kept.push(survivor);
        }
        resolution.stale.extend(members);
    }
    resolution
}
