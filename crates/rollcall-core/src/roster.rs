//! Roster manifest loading.
//!
//! ```toml
//! [[student]]
//! id = "s-001"
//! name = "Ada Lovelace"
//! images = ["ada/front.png", "ada/left.jpg"]
//! ```
//!
//! Relative image paths resolve against the manifest's directory.

use crate::types::{EnrolledIdentity, Roster};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid roster manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate student id: {0}")]
    DuplicateId(String),
    #[error("student {0} has an empty id or name")]
    MissingField(usize),
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default, rename = "student")]
    students: Vec<StudentEntry>,
}

#[derive(Debug, Deserialize)]
struct StudentEntry {
    id: String,
    name: String,
    #[serde(default)]
    images: Vec<PathBuf>,
}

/// Load a roster manifest and read every listed reference image.
///
/// Image bytes are not decoded here; undecodable images are skipped later
/// during enrollment. Missing image files are an error.
pub fn load_roster(path: impl AsRef<Path>) -> Result<Roster, RosterError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let roster = parse_roster(&text, base)?;
    tracing::info!(
        path = %path.display(),
        students = roster.len(),
        images = roster.iter().map(|s| s.images.len()).sum::<usize>(),
        "loaded roster"
    );
    Ok(roster)
}

/// Parse manifest text, resolving image paths against `base`.
pub fn parse_roster(text: &str, base: &Path) -> Result<Roster, RosterError> {
    let manifest: Manifest = toml::from_str(text)?;
    let mut seen = HashSet::new();
    let mut roster = Vec::with_capacity(manifest.students.len());

    for (index, entry) in manifest.students.into_iter().enumerate() {
        if entry.id.trim().is_empty() || entry.name.trim().is_empty() {
            return Err(RosterError::MissingField(index));
        }
        if !seen.insert(entry.id.clone()) {
            return Err(RosterError::DuplicateId(entry.id));
        }

        let mut images = Vec::with_capacity(entry.images.len());
        for image in &entry.images {
            let image_path = if image.is_absolute() {
                image.clone()
            } else {
                base.join(image)
            };
            let bytes = std::fs::read(&image_path).map_err(|source| RosterError::Io {
                path: image_path.clone(),
                source,
            })?;
            images.push(bytes);
        }
        if images.is_empty() {
            tracing::warn!(id = %entry.id, "student has no reference images");
        }
        roster.push(Arc::new(EnrolledIdentity::new(entry.id, entry.name, images)));
    }
    Ok(roster)
}
