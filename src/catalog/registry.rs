//! Image catalog
//!
//! Identifier-keyed records of slide files and their mask overlays. The
//! catalog can be seeded from a JSON manifest at startup and mutated
//! through the REST API.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A mask overlay registered for an image, addressable by its own identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayRecord {
    pub identifier: String,
    pub path: PathBuf,
}

/// A slide registered in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub identifier: String,
    pub path: PathBuf,
    #[serde(default)]
    pub overlays: Vec<OverlayRecord>,
}

/// In-memory image catalog keyed by identifier
#[derive(Default)]
pub struct Catalog {
    images: DashMap<String, ImageRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a JSON manifest containing a list of records.
    pub fn load_manifest(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        let records: Vec<ImageRecord> = serde_json::from_str(&contents)?;
        info!("Loaded {} images from manifest {:?}", records.len(), path);

        let catalog = Self::new();
        for record in records {
            catalog.insert(record);
        }
        Ok(catalog)
    }

    pub fn get(&self, identifier: &str) -> Option<ImageRecord> {
        self.images.get(identifier).map(|r| r.value().clone())
    }

    /// Look up an overlay of an image by the overlay's own identifier.
    pub fn overlay(&self, identifier: &str, overlay_identifier: &str) -> Option<OverlayRecord> {
        self.get(identifier)?
            .overlays
            .into_iter()
            .find(|overlay| overlay.identifier == overlay_identifier)
    }

    pub fn insert(&self, record: ImageRecord) {
        self.images.insert(record.identifier.clone(), record);
    }

    pub fn remove(&self, identifier: &str) -> bool {
        self.images.remove(identifier).is_some()
    }

    /// All records, sorted by identifier for stable listings.
    pub fn list(&self) -> Vec<ImageRecord> {
        let mut records: Vec<ImageRecord> =
            self.images.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        records
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
