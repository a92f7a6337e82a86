//! Layer name codec.
//!
//! External names are built from the identity fields in a fixed order:
//! country, then variable and scenario where the kind has them, then the
//! kind suffix for non-climate kinds. Fields are joined with a single `_`
//! and an underscore inside a field is written as `__`:
//!
//! ```text
//! laos / climate / temp / rcp45     -> laos_temp_rcp45
//! laos / giri / flood / rp100       -> laos_flood_rp100_giri
//! laos / energy / solar_plant       -> laos_solar__plant_energy
//! laos / boundary / admin_1         -> laos_admin__1_boundary
//! ```
//!
//! Normalized fields never start or end with `_` and never contain `__`, so a
//! single `_` is always a separator and the encoding is injective.
//!
//! Names already registered on the map server may carry a trailing
//! registration tag (`_t2`, `_1758182825568`) from older upload flows;
//! [`decode`] recovers both the identity and the tag. Boundary uploads of
//! that era were named `<country>_admin_<n>_<millis>` with no kind suffix;
//! a name of exactly that shape decodes as a boundary.

use chrono::{DateTime, TimeZone, Utc};

use crate::identity::{DatasetKind, LayerIdentity};

/// Encode an identity into its external layer name.
pub fn encode(identity: &LayerIdentity) -> String {
    let mut name = String::new();
    for (i, field) in identity.name_fields().enumerate() {
        if i > 0 {
            name.push('_');
        }
        name.push_str(&field.replace('_', "__"));
    }
    if let Some(suffix) = identity.dataset_kind().name_suffix() {
        name.push('_');
        name.push_str(suffix);
    }
    name
}

/// Whether `name` only uses characters legal in a map server identifier.
pub fn is_valid_external_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// A registered layer name split into its logical identity and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedName {
    pub identity: LayerIdentity,
    /// Trailing registration tag, e.g. `t2` or `1758182825568`.
    pub tag: Option<String>,
}

impl DecodedName {
    /// Creation time carried by an epoch-millisecond tag, if any.
    pub fn tagged_at(&self) -> Option<DateTime<Utc>> {
        self.tag.as_deref().and_then(tag_timestamp)
    }
}

/// Decode an external layer name.
///
/// Returns `None` for names this codec could not have produced (layers
/// created by other tools), which callers must leave alone.
pub fn decode(name: &str) -> Option<DecodedName> {
    let tokens = split_tokens(name)?;
    let last = tokens.last()?;

    // Suffix last: an untagged non-climate layer.
    if let Some(kind) = DatasetKind::from_suffix(last) {
        let identity = identity_from_fields(kind, &tokens[..tokens.len() - 1])?;
        return Some(DecodedName { identity, tag: None });
    }

    if tokens.len() >= 3 && is_tag(last) {
        let before = &tokens[tokens.len() - 2];
        if let Some(kind) = DatasetKind::from_suffix(before) {
            let identity = identity_from_fields(kind, &tokens[..tokens.len() - 2])?;
            return Some(DecodedName { identity, tag: Some(last.clone()) });
        }
    }

    if let Some(decoded) = decode_legacy_boundary(&tokens) {
        return Some(decoded);
    }

    match tokens.len() {
        3 => {
            let identity = identity_from_fields(DatasetKind::Climate, &tokens)?;
            Some(DecodedName { identity, tag: None })
        }
        4 if is_tag(last) => {
            let identity = identity_from_fields(DatasetKind::Climate, &tokens[..3])?;
            Some(DecodedName { identity, tag: Some(last.clone()) })
        }
        _ => None,
    }
}

/// `<country>_admin_<n>_<millis>`, as written by the boundary upload flow.
fn decode_legacy_boundary(tokens: &[String]) -> Option<DecodedName> {
    let [country, admin, level, tag] = tokens else {
        return None;
    };
    if admin != "admin" || level.is_empty() || !level.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    tag_timestamp(tag)?;

    let admin_level = format!("admin_{}", level);
    let identity = LayerIdentity::boundary(country, Some(&admin_level)).ok()?;
    Some(DecodedName { identity, tag: Some(tag.clone()) })
}

/// Interpret a 13-digit numeric tag as epoch milliseconds.
pub fn tag_timestamp(tag: &str) -> Option<DateTime<Utc>> {
    if tag.len() != 13 || !tag.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millis: i64 = tag.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Registration tags look like `t7` or a run of digits.
fn is_tag(token: &str) -> bool {
    let digits = token.strip_prefix('t').unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Split on single underscores, turning `__` back into a literal `_`.
fn split_tokens(name: &str) -> Option<Vec<String>> {
    if !is_valid_external_name(name) || name.starts_with('_') || name.ends_with('_') {
        return None;
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = name.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '_' {
            current.push(c);
            continue;
        }
        let mut run = 1;
        while chars.peek() == Some(&'_') {
            chars.next();
            run += 1;
        }
        match run {
            1 => tokens.push(std::mem::take(&mut current)),
            2 => current.push('_'),
            _ => return None,
        }
    }
    tokens.push(current);

    Some(tokens)
}

fn identity_from_fields(kind: DatasetKind, fields: &[String]) -> Option<LayerIdentity> {
    let field = |i: usize| fields.get(i).map(String::as_str);
    let expected = match kind {
        DatasetKind::Climate | DatasetKind::Giri => 3,
        DatasetKind::Energy => 2,
        DatasetKind::Boundary if fields.len() == 1 => 1,
        DatasetKind::Boundary => 2,
    };
    if fields.len() != expected {
        return None;
    }

    let identity = LayerIdentity::new(fields[0].as_str(), kind, field(1), field(2)).ok()?;
    // Re-encoding must reproduce the fields exactly, otherwise the name
    // was not in canonical form.
    (identity.name_fields().eq(fields.iter().map(String::as_str))).then_some(identity)
}
