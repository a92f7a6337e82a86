//! Startup publication of bundled boundary archives.
//!
//! Boundary shapefiles shipped with the deployment are published once the
//! map server is ready, unless the country already has a boundary record.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use layer_common::{normalize_field, LayerIdentity};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::lifecycle::{DatasetParams, LayerLifecycleManager, PublishRequest};

/// Upload tags are epoch timestamps appended to archive names.
const MIN_TAG_DIGITS: usize = 10;

/// Layer fields derived from a boundary archive name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryArchive {
    pub country: String,
    pub admin_level: Option<String>,
    pub hover_attribute: String,
}

impl BoundaryArchive {
    fn identity(&self) -> Option<LayerIdentity> {
        LayerIdentity::boundary(&self.country, self.admin_level.as_deref()).ok()
    }
}

/// Derive the boundary layer fields from an archive file stem.
///
/// `Bhutan_Dzongkhag_Boundary` is Bhutan's dzongkhag boundary, everything
/// else is `<country>[_<admin level>][_<upload tag>]`.
pub fn parse_archive_name(stem: &str) -> Option<BoundaryArchive> {
    let normalized = normalize_field(stem);
    if normalized.is_empty() {
        return None;
    }

    if normalized.contains("bhutan") || normalized.contains("dzongkhag") {
        let hover = if normalized.contains("dzongkhag") {
            "dzongkhag"
        } else {
            "bhutan"
        };
        return Some(BoundaryArchive {
            country: "bhutan".to_string(),
            admin_level: None,
            hover_attribute: hover.to_string(),
        });
    }

    let mut tokens = normalized.split('_');
    let country = tokens.next()?.to_string();
    let admin_level: Vec<&str> = tokens
        .filter(|t| !(t.len() >= MIN_TAG_DIGITS && t.bytes().all(|b| b.is_ascii_digit())))
        .collect();

    Some(BoundaryArchive {
        hover_attribute: country.clone(),
        admin_level: (!admin_level.is_empty()).then(|| admin_level.join("_")),
        country,
    })
}

/// Zip archives in the first existing directory, sorted by name.
pub fn find_archives(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let Some(dir) = dirs.iter().find(|d| d.is_dir()) else {
        debug!(dirs = ?dirs, "No boundaries directory found");
        return Vec::new();
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to read boundaries directory");
            return Vec::new();
        }
    };

    let mut archives: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
        })
        .collect();
    archives.sort();
    archives
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapStats {
    pub found: usize,
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Publish every boundary archive whose country has no boundary yet.
pub async fn bootstrap_boundaries(
    manager: &Arc<LayerLifecycleManager>,
    dirs: &[PathBuf],
) -> BootstrapStats {
    let archives = find_archives(dirs);
    let mut stats = BootstrapStats {
        found: archives.len(),
        ..Default::default()
    };

    for path in archives {
        match publish_archive(manager, &path).await {
            Ok(true) => stats.published += 1,
            Ok(false) => stats.skipped += 1,
            Err(reason) => {
                warn!(archive = %path.display(), reason = %reason, "Boundary bootstrap failed");
                stats.failed += 1;
            }
        }
    }

    info!(
        found = stats.found,
        published = stats.published,
        skipped = stats.skipped,
        failed = stats.failed,
        "Boundary bootstrap finished"
    );
    stats
}

async fn publish_archive(manager: &Arc<LayerLifecycleManager>, path: &Path) -> Result<bool, String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| "archive name is not valid UTF-8".to_string())?;
    let archive = parse_archive_name(stem)
        .ok_or_else(|| format!("cannot derive a layer from '{}'", stem))?;
    let identity = archive
        .identity()
        .ok_or_else(|| format!("'{}' does not form a valid boundary identity", stem))?;

    if manager
        .has_boundary(&archive.country)
        .await
        .map_err(|e| e.to_string())?
    {
        debug!(country = %archive.country, archive = %path.display(), "Boundary already recorded");
        return Ok(false);
    }

    let request = PublishRequest {
        identity,
        artifact_path: path.to_string_lossy().into_owned(),
        params: DatasetParams {
            hover_attribute: Some(archive.hover_attribute),
            ..Default::default()
        },
    };
    let outcome = manager.publish(request).await.map_err(|e| e.to_string())?;
    info!(layer = %outcome.external_name, archive = %path.display(), "Published bundled boundary");
    Ok(true)
}
