//! Point manifest: which vector-store points belong to which file.
//!
//! The change-cache only knows *whether* a file is current. This manifest
//! remembers the point ids written for each file so stale vectors can be
//! deleted when the file is re-indexed or removed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Point ids written per file for one namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointManifest {
    /// Version of the manifest format
    pub version: u32,

    /// Namespace the points live in
    pub namespace: String,

    /// When the manifest was last updated
    pub last_updated: Option<SystemTime>,

    /// Map of file path to point ids
    pub files: HashMap<PathBuf, Vec<String>>,

    /// Total number of points tracked
    pub total_points: usize,
}

impl PointManifest {
    /// Create a new empty manifest.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            version: 1,
            namespace: namespace.into(),
            last_updated: None,
            files: HashMap::new(),
            total_points: 0,
        }
    }

    /// Load manifest from a file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(ManifestError::Io)?;
        serde_json::from_str(&content).map_err(ManifestError::Parse)
    }

    /// Load a manifest for `namespace`, starting fresh if the file is
    /// missing, unreadable or belongs to another namespace.
    pub fn load_or_new(path: &Path, namespace: &str) -> Self {
        match Self::load(path) {
            Ok(manifest) if manifest.namespace == namespace => manifest,
            _ => Self::new(namespace),
        }
    }

    /// Save manifest to a file (written to a temp file, then renamed).
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let content = serde_json::to_string_pretty(self).map_err(ManifestError::Serialize)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(ManifestError::Io)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(ManifestError::Io)?;
        std::fs::rename(&tmp, path).map_err(ManifestError::Io)
    }

    /// Record the points written for a file. Returns the ids it replaces.
    pub fn record(&mut self, path: PathBuf, point_ids: Vec<String>) -> Option<Vec<String>> {
        self.total_points += point_ids.len();
        let previous = self.files.insert(path, point_ids);
        if let Some(ref old) = previous {
            self.total_points -= old.len();
        }
        self.last_updated = Some(SystemTime::now());
        previous
    }

    /// Remove a file from the manifest.
    pub fn remove_file(&mut self, path: &Path) -> Option<Vec<String>> {
        let removed = self.files.remove(path)?;
        self.total_points -= removed.len();
        self.last_updated = Some(SystemTime::now());
        Some(removed)
    }

    pub fn point_ids(&self, path: &Path) -> Option<&[String]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Clear the entire manifest.
    pub fn clear(&mut self) {
        self.files.clear();
        self.total_points = 0;
        self.last_updated = Some(SystemTime::now());
    }
}

/// Errors that can occur when working with manifests.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    #[error("Failed to parse manifest: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[source] serde_json::Error),
}
